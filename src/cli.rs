use clap::{Parser, Subcommand};

/// Bedrock chat client
#[derive(Debug, Parser)]
#[command(name = "bedrock-chat")]
#[command(version)]
#[command(about = "Chat with a Bedrock-hosted model behind Cognito sign-in", long_about = None)]
pub struct Args {
    /// Bedrock model id (default: config/model_id or Claude 3 Sonnet)
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Backend: "aws" or "stub" (default: config/backend or "aws")
    #[arg(long = "backend")]
    pub backend: Option<String>,

    /// User-pool username for one-shot prompts
    #[arg(short = 'u', long = "username", env = "BEDROCK_CHAT_USERNAME")]
    pub username: Option<String>,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (positional) (used when no subcommand is given)
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the interactive terminal chat (sign-in form, then chat)
    #[cfg(feature = "tui")]
    Tui,
}
