use anyhow::Context;
use std::env;
use std::path::PathBuf;

fn home_dir() -> anyhow::Result<PathBuf> {
    // On Unix, HOME is standard.
    let home = env::var_os("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home))
}

fn chat_home() -> Option<PathBuf> {
    env::var_os("BEDROCK_CHAT_HOME").map(PathBuf::from)
}

/// Directory holding `config.toml`. Nothing is written here, so it is not created.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    if let Some(base) = chat_home() {
        return Ok(base.join("config"));
    }

    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME").map(PathBuf::from) {
        return Ok(xdg.join("bedrock-chat"));
    }

    Ok(home_dir()?.join(".config").join("bedrock-chat"))
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}
