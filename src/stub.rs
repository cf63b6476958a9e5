//! Offline backend: accepts any sign-in and echoes the prompt back in pieces.

use crate::auth::{now_secs, IdentityProvider, Session};
use crate::credentials::{CredentialBroker, Credentials};
use crate::error::ChatError;
use crate::provider::{FragmentStream, InferenceClient, TextFragment};
use anyhow::anyhow;
use futures_core::future::BoxFuture;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Clone)]
pub struct StubIdentity;

impl StubIdentity {
    pub fn new() -> Self {
        Self
    }
}

impl IdentityProvider for StubIdentity {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn sign_in(&self, username: String, password: String) -> BoxFuture<'static, anyhow::Result<Session>> {
        Box::pin(async move {
            if username.trim().is_empty() || password.is_empty() {
                return Err(anyhow!("username and password are required"));
            }
            Ok(Session {
                id_token: format!("stub-id-{username}"),
                access_token: format!("stub-access-{username}"),
                refresh_token: Some(format!("stub-refresh-{username}")),
                username,
                obtained_at: now_secs(),
                expires_in: Some(3600),
            })
        })
    }

    fn refresh(&self, session: Session) -> BoxFuture<'static, anyhow::Result<Session>> {
        Box::pin(async move {
            if session.refresh_token.is_none() {
                return Err(anyhow!("no refresh token"));
            }
            Ok(Session {
                obtained_at: now_secs(),
                ..session
            })
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct StubBroker;

impl StubBroker {
    pub fn new() -> Self {
        Self
    }
}

impl CredentialBroker for StubBroker {
    fn obtain_credentials(&self, session: Session) -> BoxFuture<'static, Result<Credentials, ChatError>> {
        Box::pin(async move {
            if !session.is_valid_for(Duration::ZERO) {
                return Err(ChatError::session_unavailable());
            }
            Ok(Credentials {
                identity_id: format!("stub:{}", session.username),
                access_key_id: "STUBACCESSKEY".to_string(),
                secret_key: "stub-secret".to_string(),
                session_token: "stub-session".to_string(),
                expiration: None,
            })
        })
    }
}

#[derive(Debug, Clone)]
pub struct StubClient {
    delay: Duration,
}

impl Default for StubClient {
    fn default() -> Self {
        Self::new()
    }
}

impl StubClient {
    pub fn new() -> Self {
        Self {
            delay: Duration::from_millis(120),
        }
    }

    #[cfg(test)]
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

impl InferenceClient for StubClient {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn stream_completion(
        &self,
        _credentials: Credentials,
        prompt: String,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<FragmentStream, ChatError>> {
        let delay = self.delay;
        Box::pin(async move {
            // Drip a few fragments with delays in place of a real model.
            let (tx, rx) = mpsc::channel::<Result<TextFragment, ChatError>>(32);

            tokio::spawn(async move {
                let parts = ["You said: ", prompt.as_str(), "\n\n", "(stub backend; no model was called)"];

                for p in parts {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            let _ = tx.send(Err(ChatError::Cancelled)).await;
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    if tx.send(Ok(TextFragment { text: p.to_string() })).await.is_err() {
                        break;
                    }
                }
            });

            Ok(Box::pin(ReceiverStream::new(rx)) as FragmentStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn stub_identity_requires_both_fields() {
        let id = StubIdentity::new();
        assert!(id.sign_in("".into(), "pw".into()).await.is_err());
        let s = id.sign_in("bob".into(), "pw".into()).await.unwrap();
        assert_eq!(s.username, "bob");
    }

    #[tokio::test(start_paused = true)]
    async fn stub_client_echoes_prompt() {
        let creds = StubBroker::new()
            .obtain_credentials(crate::auth::test_session("bob"))
            .await
            .unwrap();
        let stream = StubClient::new()
            .stream_completion(creds, "ping".into(), CancellationToken::new())
            .await
            .unwrap();

        let text: Vec<String> = stream.map(|f| f.unwrap().text).collect().await;
        assert_eq!(text.concat(), "You said: ping\n\n(stub backend; no model was called)");
    }

    #[tokio::test(start_paused = true)]
    async fn stub_client_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let creds = StubBroker::new()
            .obtain_credentials(crate::auth::test_session("bob"))
            .await
            .unwrap();
        let mut stream = StubClient::new()
            .stream_completion(creds, "ping".into(), cancel.clone())
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap().text, "You said: ");
        cancel.cancel();
        assert_eq!(stream.next().await, Some(Err(ChatError::Cancelled)));
        assert_eq!(stream.next().await, None);
    }
}
