//! `parley config` — print the effective configuration.

use parley_config::AppConfig;

pub fn show(config: &AppConfig) {
    println!("{}", config.redacted_toml());
}
