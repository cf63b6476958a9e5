mod app;
mod auth;
mod cli;
mod cognito;
mod config;
mod conversation;
mod credentials;
mod error;
mod gate;
mod paths;
mod provider;
mod stub;

#[cfg(feature = "tui")]
mod tui;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    // The TUI owns the terminal, so it only logs when asked to.
    let default_filter = if args.cmd.is_some() { "off" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let config_path = paths::config_path()?;
    let mut cfg = config::Config::resolve(&config_path)?;
    if let Some(model) = args.model.clone() {
        cfg.model_id = Some(model);
    }
    tracing::debug!(?config_path, ?cfg, "resolved config");

    let backend_name = args
        .backend
        .clone()
        .or_else(|| cfg.backend.clone())
        .unwrap_or_else(|| "aws".to_string());

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let cfg = Arc::new(cfg);
    let backend = app::build_backend(&http, cfg, &backend_name)?;

    match args.cmd {
        #[cfg(feature = "tui")]
        Some(cli::Command::Tui) => {
            return tui::run_tui(backend).await;
        }
        None => {}
    }

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("No prompt provided. Try: bedrock-chat -u alice \"Hello\" or `bedrock-chat tui`");
    }

    let username = args
        .username
        .clone()
        .context("missing username (pass --username or set BEDROCK_CHAT_USERNAME)")?;
    let password = app::read_password()?;

    let form = gate::SignInForm { username, password };
    let mut out = std::io::stdout();
    app::run_prompt(&backend, form, prompt, &mut out).await
}
