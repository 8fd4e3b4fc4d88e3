//! `parley turn` — run one conversation turn end to end.

use parley_agent::{TurnInput, TurnRunner};
use parley_config::AppConfig;
use parley_providers::{OpenAiCompatProvider, ResilientInvoker};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct TurnArgs {
    pub user: Option<String>,
    pub persona: String,
    pub message: String,
    pub system_file: Option<PathBuf>,
    pub history_file: Option<PathBuf>,
    pub free: bool,
    pub ephemeral: bool,
    pub json: bool,
}

/// Assemble the pipeline input from the command line and its files.
fn turn_input(args: &TurnArgs) -> Result<TurnInput, Box<dyn std::error::Error>> {
    Ok(TurnInput {
        user_id: args.user.clone(),
        persona_id: args.persona.clone(),
        system_prompt: super::read_system_prompt(args.system_file.as_ref())?,
        message: args.message.clone(),
        history: super::read_history(args.history_file.as_ref())?,
        use_free_default: args.free,
        ..Default::default()
    })
}

pub async fn run(config: &AppConfig, args: TurnArgs) -> Result<(), Box<dyn std::error::Error>> {
    if config.provider.api_key.is_none() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    PARLEY_API_KEY, OPENROUTER_API_KEY, OPENAI_API_KEY");
        eprintln!();
        eprintln!("  Or add `api_key` under [provider] in:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let resolver = super::open_resolver(config, args.ephemeral).await?;
    let provider = Arc::new(OpenAiCompatProvider::from_config(&config.provider));
    let invoker = ResilientInvoker::from_config(provider, &config.invocation);
    let runner = TurnRunner::new(resolver, Arc::new(config.clone()), invoker);

    let input = turn_input(&args)?;

    // Ctrl-C aborts the in-flight call and any pending backoff
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling turn");
            on_signal.cancel();
        }
    });

    let output = runner.run_with_cancel(input, &cancel).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", output.completion.text);
        eprintln!(
            "\n[{} via {} · {} attempt(s) · {}/{} tokens]",
            output.resolution.config.model,
            output.resolution.source,
            output.completion.attempt_count(),
            output.plan.total_tokens(),
            output.plan.window_size,
        );
    }
    Ok(())
}
