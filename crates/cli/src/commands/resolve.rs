//! `parley resolve` — show the config a user/persona pair resolves to.

use parley_agent::PersonaDefaults;
use parley_config::AppConfig;
use serde_json::json;

pub async fn run(
    config: &AppConfig,
    user: Option<String>,
    persona: &str,
    free: bool,
    ephemeral: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let resolver = super::open_resolver(config, ephemeral).await?;
    let defaults = config.persona_defaults(persona);

    let resolution = if free {
        match resolver.resolve_free_default().await {
            Some(free) => free.apply(&defaults),
            None => return Err("No free default config is stored".into()),
        }
    } else {
        resolver.resolve(user.as_deref(), persona, &defaults).await
    };

    let out = json!({
        "user": user,
        "persona": persona,
        "source": resolution.source,
        "name": resolution.name,
        "config": resolution.config,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
