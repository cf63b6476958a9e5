use crate::cognito;
use crate::config::Config;
use anyhow::anyhow;
use futures_core::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Signed-in user. Owned by the gate; everything else works on copies.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: Option<String>,

    /// Seconds since UNIX epoch.
    pub obtained_at: u64,

    /// Lifetime of the id/access tokens in seconds.
    pub expires_in: Option<u64>,
}

impl Session {
    pub fn expires_at(&self) -> Option<u64> {
        self.expires_in.map(|s| self.obtained_at.saturating_add(s))
    }

    pub fn is_valid_for(&self, skew: Duration) -> bool {
        let Some(exp) = self.expires_at() else {
            // No expiry? Treat as valid.
            return true;
        };
        now_secs().saturating_add(skew.as_secs()) < exp
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("obtained_at", &self.obtained_at)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Identity provider seam: user-pool sign-in and token refresh.
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn sign_in(&self, username: String, password: String) -> BoxFuture<'static, anyhow::Result<Session>>;

    /// Exchange the session's refresh token for fresh id/access tokens.
    fn refresh(&self, session: Session) -> BoxFuture<'static, anyhow::Result<Session>>;
}

/// Cognito user-pool client using the public (secretless) app client flows.
#[derive(Debug, Clone)]
pub struct UserPoolClient {
    http: reqwest::Client,
    cfg: Arc<Config>,
}

impl UserPoolClient {
    pub fn new(http: reqwest::Client, cfg: Arc<Config>) -> Self {
        Self { http, cfg }
    }

    async fn initiate_auth(&self, flow: &str, params: BTreeMap<&str, &str>) -> anyhow::Result<AuthenticationResult> {
        let endpoint = self.cfg.cognito_idp_endpoint().map_err(|e| anyhow!(e))?;
        let client_id = self.cfg.user_pool_client_id().map_err(|e| anyhow!(e))?;

        let req = InitiateAuthRequest {
            auth_flow: flow,
            client_id,
            auth_parameters: params,
        };

        let resp: InitiateAuthResponse = cognito::call(
            &self.http,
            &endpoint,
            "AWSCognitoIdentityProviderService.InitiateAuth",
            &req,
        )
        .await
        .map_err(|e| anyhow!(e))?;

        if let Some(result) = resp.authentication_result {
            return Ok(result);
        }
        match resp.challenge_name {
            Some(challenge) => Err(anyhow!("sign-in challenge not supported: {challenge}")),
            None => Err(anyhow!("sign-in response carried no tokens")),
        }
    }
}

impl IdentityProvider for UserPoolClient {
    fn name(&self) -> &'static str {
        "cognito"
    }

    fn sign_in(&self, username: String, password: String) -> BoxFuture<'static, anyhow::Result<Session>> {
        let this = self.clone();
        Box::pin(async move {
            let params = BTreeMap::from([("USERNAME", username.as_str()), ("PASSWORD", password.as_str())]);
            let result = this.initiate_auth("USER_PASSWORD_AUTH", params).await?;
            tracing::info!(%username, "signed in");
            Ok(result.into_session(username, None))
        })
    }

    fn refresh(&self, session: Session) -> BoxFuture<'static, anyhow::Result<Session>> {
        let this = self.clone();
        Box::pin(async move {
            let Some(refresh_token) = session.refresh_token.clone() else {
                return Err(anyhow!("session expired and no refresh token is available"));
            };
            let params = BTreeMap::from([("REFRESH_TOKEN", refresh_token.as_str())]);
            let result = this.initiate_auth("REFRESH_TOKEN_AUTH", params).await?;
            tracing::debug!(username = %session.username, "refreshed session tokens");
            // Cognito omits the refresh token on refresh; keep the existing one.
            Ok(result.into_session(session.username, session.refresh_token))
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthRequest<'a> {
    auth_flow: &'a str,
    client_id: &'a str,
    auth_parameters: BTreeMap<&'a str, &'a str>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthResponse {
    #[serde(default)]
    authentication_result: Option<AuthenticationResult>,
    #[serde(default)]
    challenge_name: Option<String>,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    access_token: String,
    id_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl fmt::Debug for AuthenticationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationResult")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

impl AuthenticationResult {
    fn into_session(self, username: String, previous_refresh: Option<String>) -> Session {
        Session {
            username,
            id_token: self.id_token,
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            obtained_at: now_secs(),
            expires_in: self.expires_in,
        }
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}

#[cfg(test)]
pub(crate) fn test_session(username: &str) -> Session {
    Session {
        username: username.to_string(),
        id_token: format!("id-token-{username}"),
        access_token: format!("access-token-{username}"),
        refresh_token: Some(format!("refresh-token-{username}")),
        obtained_at: now_secs(),
        expires_in: Some(3600),
    }
}
