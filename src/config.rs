use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_MODEL_ID: &str = "anthropic.claude-3-sonnet-20240229-v1:0";

const ENV_PREFIX: &str = "BEDROCK_CHAT_";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// AWS region shared by the user pool, identity pool and Bedrock.
    pub region: Option<String>,
    pub user_pool_id: Option<String>,
    pub user_pool_client_id: Option<String>,
    pub identity_pool_id: Option<String>,

    /// Bedrock model id (optional, defaults to Claude 3 Sonnet).
    pub model_id: Option<String>,

    /// Backend identifier ("aws" or "stub").
    pub backend: Option<String>,

    #[serde(default)]
    pub endpoints: Endpoints,
}

/// Endpoint overrides, mostly useful against local fakes.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Endpoints {
    pub cognito_idp: Option<String>,
    pub cognito_identity: Option<String>,
    pub bedrock: Option<String>,
}

impl Config {
    /// Parse the TOML file at `path`. A missing file is `None`; an unreadable
    /// or malformed one is an error naming the path.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            other => other.with_context(|| format!("cannot read {}", path.display()))?,
        };
        toml::from_str::<Self>(&text)
            .map(Some)
            .with_context(|| format!("invalid config in {}", path.display()))
    }

    /// File config (if any) overlaid with `BEDROCK_CHAT_*` environment variables.
    pub fn resolve(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut cfg = Self::from_file(path)?.unwrap_or_default();
        cfg.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok());
        Ok(cfg)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let fields: [(&str, &mut Option<String>); 6] = [
            ("REGION", &mut self.region),
            ("USER_POOL_ID", &mut self.user_pool_id),
            ("USER_POOL_CLIENT_ID", &mut self.user_pool_client_id),
            ("IDENTITY_POOL_ID", &mut self.identity_pool_id),
            ("MODEL_ID", &mut self.model_id),
            ("BACKEND", &mut self.backend),
        ];
        for (key, slot) in fields {
            if let Some(v) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = Some(v);
            }
        }
    }

    pub fn region(&self) -> Result<&str, String> {
        required("region", &self.region)
    }

    pub fn user_pool_id(&self) -> Result<&str, String> {
        required("user pool id", &self.user_pool_id)
    }

    pub fn user_pool_client_id(&self) -> Result<&str, String> {
        required("user pool client id", &self.user_pool_client_id)
    }

    pub fn identity_pool_id(&self) -> Result<&str, String> {
        required("identity pool id", &self.identity_pool_id)
    }

    pub fn model_id(&self) -> &str {
        self.model_id.as_deref().unwrap_or(DEFAULT_MODEL_ID)
    }

    /// Issuer key the identity pool expects in its login map.
    pub fn login_provider(&self) -> Result<String, String> {
        Ok(format!(
            "cognito-idp.{}.amazonaws.com/{}",
            self.region()?,
            self.user_pool_id()?
        ))
    }

    pub fn cognito_idp_endpoint(&self) -> Result<String, String> {
        match &self.endpoints.cognito_idp {
            Some(url) => Ok(url.clone()),
            None => Ok(format!("https://cognito-idp.{}.amazonaws.com/", self.region()?)),
        }
    }

    pub fn cognito_identity_endpoint(&self) -> Result<String, String> {
        match &self.endpoints.cognito_identity {
            Some(url) => Ok(url.clone()),
            None => Ok(format!("https://cognito-identity.{}.amazonaws.com/", self.region()?)),
        }
    }
}

// Missing settings are reported when a component first needs them, not at startup.
fn required<'a>(name: &str, value: &'a Option<String>) -> Result<&'a str, String> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| format!("missing configuration: {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parses_toml_with_endpoint_overrides() {
        let cfg: Config = toml::from_str(
            r#"
            region = "us-east-1"
            user_pool_id = "us-east-1_AbC"
            identity_pool_id = "us-east-1:1234"

            [endpoints]
            cognito_identity = "http://127.0.0.1:9000/"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.region().unwrap(), "us-east-1");
        assert_eq!(cfg.model_id(), DEFAULT_MODEL_ID);
        assert_eq!(cfg.login_provider().unwrap(), "cognito-idp.us-east-1.amazonaws.com/us-east-1_AbC");
        assert_eq!(cfg.cognito_identity_endpoint().unwrap(), "http://127.0.0.1:9000/");
        assert_eq!(
            cfg.cognito_idp_endpoint().unwrap(),
            "https://cognito-idp.us-east-1.amazonaws.com/"
        );
    }

    #[test]
    fn env_overrides_win_and_blank_values_are_ignored() {
        let mut cfg = Config {
            region: Some("eu-west-1".into()),
            model_id: Some("from-file".into()),
            ..Default::default()
        };
        let env: HashMap<&str, &str> = [("REGION", "us-west-2"), ("MODEL_ID", "  ")].into();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.region.as_deref(), Some("us-west-2"));
        assert_eq!(cfg.model_id(), "from-file");
    }

    #[test]
    fn missing_values_fail_on_access() {
        let cfg = Config::default();
        assert_eq!(cfg.identity_pool_id().unwrap_err(), "missing configuration: identity pool id");
        assert!(cfg.login_provider().is_err());
    }

    #[test]
    fn absent_file_is_not_an_error() {
        let got = Config::from_file("/nonexistent/bedrock-chat/config.toml").unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn malformed_file_error_names_the_path() {
        let path = std::env::temp_dir().join(format!("bedrock-chat-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "region = [unterminated").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        std::fs::remove_file(&path).ok();

        assert_eq!(err.to_string(), format!("invalid config in {}", path.display()));
    }
}
