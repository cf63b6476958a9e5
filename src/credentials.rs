use crate::auth::{IdentityProvider, Session};
use crate::cognito;
use crate::config::Config;
use crate::error::ChatError;
use futures_core::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Temporary AWS credentials for one inference call. Never cached.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub identity_id: String,
    pub access_key_id: String,
    pub secret_key: String,
    pub session_token: String,
    pub expiration: Option<SystemTime>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity_id", &self.identity_id)
            .field("access_key_id", &self.access_key_id)
            .field("secret_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

pub trait CredentialBroker: Send + Sync {
    /// Fetch a usable session, then trade its identity token for credentials.
    ///
    /// Every failure is an [`ChatError::Auth`]; nothing is retried.
    fn obtain_credentials(&self, session: Session) -> BoxFuture<'static, Result<Credentials, ChatError>>;
}

const SESSION_SKEW: Duration = Duration::from_secs(30);

/// Identity-pool broker: `GetId` followed by `GetCredentialsForIdentity`.
#[derive(Clone)]
pub struct CognitoBroker {
    http: reqwest::Client,
    cfg: Arc<Config>,
    identity: Arc<dyn IdentityProvider>,
}

impl CognitoBroker {
    pub fn new(http: reqwest::Client, cfg: Arc<Config>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { http, cfg, identity }
    }

    async fn fetch_session(&self, session: Session) -> Result<Session, ChatError> {
        if session.is_valid_for(SESSION_SKEW) {
            return Ok(session);
        }
        self.identity.refresh(session).await.map_err(|e| {
            tracing::warn!(error = %format!("{e:#}"), "session refresh failed");
            ChatError::session_unavailable()
        })
    }

    async fn exchange(&self, session: &Session) -> Result<Credentials, String> {
        let endpoint = self.cfg.cognito_identity_endpoint()?;
        let identity_pool_id = self.cfg.identity_pool_id()?;
        let logins = BTreeMap::from([(self.cfg.login_provider()?, session.id_token.as_str())]);

        let id: GetIdResponse = cognito::call(
            &self.http,
            &endpoint,
            "AWSCognitoIdentityService.GetId",
            &GetIdRequest {
                identity_pool_id,
                logins: &logins,
            },
        )
        .await?;

        let resp: GetCredentialsResponse = cognito::call(
            &self.http,
            &endpoint,
            "AWSCognitoIdentityService.GetCredentialsForIdentity",
            &GetCredentialsRequest {
                identity_id: &id.identity_id,
                logins: &logins,
            },
        )
        .await?;

        let c = resp.credentials;
        Ok(Credentials {
            identity_id: resp.identity_id.unwrap_or(id.identity_id),
            access_key_id: c.access_key_id,
            secret_key: c.secret_key,
            session_token: c.session_token,
            // An expiry the clock cannot represent is dropped, not fatal.
            expiration: c
                .expiration
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .and_then(|d| UNIX_EPOCH.checked_add(d)),
        })
    }
}

impl CredentialBroker for CognitoBroker {
    fn obtain_credentials(&self, session: Session) -> BoxFuture<'static, Result<Credentials, ChatError>> {
        let this = self.clone();
        Box::pin(async move {
            let session = this.fetch_session(session).await?;
            let creds = this.exchange(&session).await.map_err(ChatError::Auth)?;
            tracing::debug!(identity_id = %creds.identity_id, "obtained temporary credentials");
            Ok(creds)
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetIdRequest<'a> {
    identity_pool_id: &'a str,
    logins: &'a BTreeMap<String, &'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetIdResponse {
    identity_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetCredentialsRequest<'a> {
    identity_id: &'a str,
    logins: &'a BTreeMap<String, &'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetCredentialsResponse {
    #[serde(default)]
    identity_id: Option<String>,
    credentials: IdentityCredentials,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IdentityCredentials {
    access_key_id: String,
    secret_key: String,
    session_token: String,
    /// Epoch seconds, possibly fractional.
    #[serde(default)]
    expiration: Option<f64>,
}

impl fmt::Debug for IdentityCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_session;
    use crate::stub::StubIdentity;
    use mockito::Matcher;
    use serde_json::json;

    fn config_for(server_url: &str) -> Arc<Config> {
        let mut cfg = Config {
            region: Some("us-east-1".into()),
            user_pool_id: Some("us-east-1_pool".into()),
            identity_pool_id: Some("us-east-1:pool-guid".into()),
            ..Default::default()
        };
        cfg.endpoints.cognito_identity = Some(format!("{server_url}/"));
        Arc::new(cfg)
    }

    fn broker(cfg: Arc<Config>) -> CognitoBroker {
        CognitoBroker::new(reqwest::Client::new(), cfg, Arc::new(StubIdentity::new()))
    }

    #[tokio::test]
    async fn exchanges_id_token_for_credentials() {
        let mut server = mockito::Server::new_async().await;
        let logins = json!({"cognito-idp.us-east-1.amazonaws.com/us-east-1_pool": "id-token-alice"});

        let get_id = server
            .mock("POST", "/")
            .match_header("x-amz-target", "AWSCognitoIdentityService.GetId")
            .match_body(Matcher::PartialJson(json!({
                "IdentityPoolId": "us-east-1:pool-guid",
                "Logins": logins.clone()
            })))
            .with_status(200)
            .with_body(r#"{"IdentityId":"us-east-1:identity-1"}"#)
            .create_async()
            .await;

        let get_creds = server
            .mock("POST", "/")
            .match_header("x-amz-target", "AWSCognitoIdentityService.GetCredentialsForIdentity")
            .match_body(Matcher::PartialJson(json!({
                "IdentityId": "us-east-1:identity-1",
                "Logins": logins
            })))
            .with_status(200)
            .with_body(
                json!({
                    "IdentityId": "us-east-1:identity-1",
                    "Credentials": {
                        "AccessKeyId": "ASIAEXAMPLE",
                        "SecretKey": "secret",
                        "SessionToken": "token",
                        "Expiration": 1.7e9
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let creds = broker(config_for(&server.url()))
            .obtain_credentials(test_session("alice"))
            .await
            .unwrap();

        get_id.assert_async().await;
        get_creds.assert_async().await;
        assert_eq!(creds.access_key_id, "ASIAEXAMPLE");
        assert_eq!(creds.identity_id, "us-east-1:identity-1");
        assert_eq!(creds.expiration, Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000)));
        assert!(!format!("{creds:?}").contains("secret\""));
    }

    #[tokio::test]
    async fn unrepresentable_expiration_is_dropped() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_header("x-amz-target", "AWSCognitoIdentityService.GetId")
            .with_status(200)
            .with_body(r#"{"IdentityId":"us-east-1:identity-1"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/")
            .match_header("x-amz-target", "AWSCognitoIdentityService.GetCredentialsForIdentity")
            .with_status(200)
            .with_body(
                r#"{"IdentityId":"us-east-1:identity-1","Credentials":{"AccessKeyId":"ASIAEXAMPLE","SecretKey":"secret","SessionToken":"token","Expiration":1e300}}"#,
            )
            .create_async()
            .await;

        let creds = broker(config_for(&server.url()))
            .obtain_credentials(test_session("alice"))
            .await
            .unwrap();

        assert_eq!(creds.access_key_id, "ASIAEXAMPLE");
        assert_eq!(creds.expiration, None);
    }

    #[tokio::test]
    async fn rejected_exchange_is_prefixed_auth_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(400)
            .with_body(r#"{"__type":"NotAuthorizedException","message":"token expired"}"#)
            .create_async()
            .await;

        let err = broker(config_for(&server.url()))
            .obtain_credentials(test_session("alice"))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Failed to initialize inference client: token expired");
    }

    #[tokio::test]
    async fn missing_configuration_fails_at_first_use() {
        let err = broker(Arc::new(Config::default()))
            .obtain_credentials(test_session("alice"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ChatError::auth("missing configuration: region")
        );
    }

    #[tokio::test]
    async fn unrefreshable_session_is_unavailable() {
        let mut stale = test_session("alice");
        stale.obtained_at = 0;
        stale.refresh_token = None;

        let err = broker(Arc::new(Config::default()))
            .obtain_credentials(stale)
            .await
            .unwrap_err();

        assert_eq!(err, ChatError::session_unavailable());
    }
}
