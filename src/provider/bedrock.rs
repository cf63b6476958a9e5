use super::{FragmentStream, InferenceClient, TextFragment};
use crate::config::Config;
use crate::credentials::Credentials;
use crate::error::ChatError;
use aws_sdk_bedrockruntime::config::{BehaviorVersion, Region};
use aws_sdk_bedrockruntime::error::DisplayErrorContext;
use aws_sdk_bedrockruntime::primitives::event_stream::EventReceiver;
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::types::error::ResponseStreamError;
use aws_sdk_bedrockruntime::types::ResponseStream;
use futures_core::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

pub const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
pub const MAX_TOKENS: u32 = 4096;

const CONTENT_DELTA: &str = "content_block_delta";

/// Bedrock runtime client for Anthropic models.
///
/// A fresh SDK client is built per call from the credentials handed in, so
/// nothing outlives one submission.
#[derive(Debug, Clone)]
pub struct BedrockClient {
    cfg: Arc<Config>,
}

impl BedrockClient {
    pub fn new(cfg: Arc<Config>) -> Self {
        Self { cfg }
    }

    fn sdk_client(&self, creds: &Credentials) -> Result<aws_sdk_bedrockruntime::Client, ChatError> {
        let region = self.cfg.region().map_err(ChatError::Transport)?;

        let provider = aws_sdk_bedrockruntime::config::Credentials::new(
            creds.access_key_id.clone(),
            creds.secret_key.clone(),
            Some(creds.session_token.clone()),
            creds.expiration,
            "cognito-identity",
        );

        let mut builder = aws_sdk_bedrockruntime::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(provider);
        if let Some(url) = &self.cfg.endpoints.bedrock {
            builder = builder.endpoint_url(url);
        }

        Ok(aws_sdk_bedrockruntime::Client::from_conf(builder.build()))
    }
}

impl InferenceClient for BedrockClient {
    fn name(&self) -> &'static str {
        "bedrock"
    }

    fn stream_completion(
        &self,
        credentials: Credentials,
        prompt: String,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<FragmentStream, ChatError>> {
        let this = self.clone();

        Box::pin(async move {
            let client = this.sdk_client(&credentials)?;
            let model_id = this.cfg.model_id().to_string();
            let body = invoke_body(&prompt)?;

            tracing::debug!(%model_id, prompt_len = prompt.len(), "invoking model");

            let output = client
                .invoke_model_with_response_stream()
                .model_id(&model_id)
                .content_type("application/json")
                .accept("application/json")
                .body(Blob::new(body))
                .send()
                .await
                .map_err(|e| ChatError::transport(DisplayErrorContext(&e).to_string()))?;

            let (tx, rx) = mpsc::channel::<Result<TextFragment, ChatError>>(64);
            tokio::spawn(pump(output.body, tx, cancel, model_id));

            Ok(Box::pin(ReceiverStream::new(rx)) as FragmentStream)
        })
    }
}

/// One frame off the response stream, reduced to what the reader cares about.
#[derive(Debug, Clone, PartialEq)]
enum RawEvent {
    Chunk(Option<Vec<u8>>),
    Other(String),
}

/// Where [`pump`] pulls frames from. Errors are already rendered for display.
trait EventSource: Send {
    fn next_event(&mut self) -> BoxFuture<'_, Result<Option<RawEvent>, String>>;
}

impl EventSource for EventReceiver<ResponseStream, ResponseStreamError> {
    fn next_event(&mut self) -> BoxFuture<'_, Result<Option<RawEvent>, String>> {
        Box::pin(async move {
            match self.recv().await {
                Ok(Some(ResponseStream::Chunk(part))) => {
                    Ok(Some(RawEvent::Chunk(part.bytes().map(|b| b.as_ref().to_vec()))))
                }
                Ok(Some(other)) => Ok(Some(RawEvent::Other(format!("{other:?}")))),
                Ok(None) => Ok(None),
                Err(e) => Err(DisplayErrorContext(&e).to_string()),
            }
        })
    }
}

/// Forward decoded text fragments from `events` into `tx` until the stream
/// ends, fails, the receiver goes away, or `cancel` fires.
async fn pump<S: EventSource>(
    mut events: S,
    tx: mpsc::Sender<Result<TextFragment, ChatError>>,
    cancel: CancellationToken,
    model_id: String,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = tx.send(Err(ChatError::Cancelled)).await;
                return;
            }
            next = events.next_event() => next,
        };

        match next {
            Ok(Some(RawEvent::Chunk(Some(bytes)))) => match decode_chunk(&bytes) {
                Ok(Some(text)) => {
                    if tx.send(Ok(TextFragment { text })).await.is_err() {
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            },
            Ok(Some(RawEvent::Chunk(None))) => {}
            Ok(Some(RawEvent::Other(kind))) => {
                tracing::trace!(%kind, "ignoring non-chunk stream event");
            }
            Ok(None) => {
                tracing::debug!(%model_id, "model stream finished");
                return;
            }
            Err(msg) => {
                let _ = tx.send(Err(ChatError::transport(msg))).await;
                return;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct InvokeBody<'a> {
    anthropic_version: &'static str,
    max_tokens: u32,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Clone, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

fn invoke_body(prompt: &str) -> Result<Vec<u8>, ChatError> {
    let body = InvokeBody {
        anthropic_version: ANTHROPIC_VERSION,
        max_tokens: MAX_TOKENS,
        messages: [Message {
            role: "user",
            content: prompt,
        }],
    };
    serde_json::to_vec(&body).map_err(|e| ChatError::transport(format!("failed to encode request: {e}")))
}

#[derive(Debug, Clone, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    delta: Option<serde_json::Value>,
}

/// Decode one chunk payload; only content deltas with a text field produce output.
pub(crate) fn decode_chunk(bytes: &[u8]) -> Result<Option<String>, ChatError> {
    let s = std::str::from_utf8(bytes)
        .map_err(|e| ChatError::decode(format!("stream chunk is not valid UTF-8: {e}")))?;
    let event: StreamEvent = serde_json::from_str(s)
        .map_err(|e| ChatError::decode(format!("failed to parse stream chunk JSON: {e}")))?;

    if event.kind.as_deref() != Some(CONTENT_DELTA) {
        return Ok(None);
    }
    Ok(event
        .delta
        .as_ref()
        .and_then(|d| d.get("text"))
        .and_then(|t| t.as_str())
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Replays a fixed list of frames, then never yields again.
    struct ScriptedEvents(VecDeque<Result<Option<RawEvent>, String>>);

    impl ScriptedEvents {
        fn new(script: Vec<Result<Option<RawEvent>, String>>) -> Self {
            Self(script.into())
        }
    }

    impl EventSource for ScriptedEvents {
        fn next_event(&mut self) -> BoxFuture<'_, Result<Option<RawEvent>, String>> {
            let next = self.0.pop_front();
            Box::pin(async move {
                match next {
                    Some(item) => item,
                    None => std::future::pending().await,
                }
            })
        }
    }

    fn delta(text: &str) -> Result<Option<RawEvent>, String> {
        let chunk = json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": text}});
        Ok(Some(RawEvent::Chunk(Some(chunk.to_string().into_bytes()))))
    }

    async fn drain(script: Vec<Result<Option<RawEvent>, String>>) -> Vec<Result<TextFragment, ChatError>> {
        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(pump(ScriptedEvents::new(script), tx, CancellationToken::new(), "m".into()));
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    fn text(t: &str) -> Result<TextFragment, ChatError> {
        Ok(TextFragment { text: t.to_string() })
    }

    #[test]
    fn body_carries_single_user_turn() {
        let body: serde_json::Value = serde_json::from_slice(&invoke_body("hello").unwrap()).unwrap();
        assert_eq!(
            body,
            json!({
                "anthropic_version": "bedrock-2023-05-31",
                "max_tokens": 4096,
                "messages": [{"role": "user", "content": "hello"}]
            })
        );
    }

    #[test]
    fn text_deltas_become_fragments() {
        let chunk = br#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#;
        assert_eq!(decode_chunk(chunk).unwrap().as_deref(), Some("Hi"));
    }

    #[test]
    fn other_events_are_ignored() {
        let chunks: [&[u8]; 6] = [
            br#"{"type":"message_start","message":{"id":"msg_1","role":"assistant"}}"#,
            br#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            br#"{"type":"message_delta","delta":{"stop_reason":"end_turn"}}"#,
            br#"{"type":"message_stop","amazon-bedrock-invocationMetrics":{"inputTokenCount":3}}"#,
            br#"{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{"}}"#,
            br#"{"index":0}"#,
        ];
        for chunk in chunks {
            assert_eq!(decode_chunk(chunk).unwrap(), None);
        }
    }

    #[test]
    fn malformed_chunks_are_decode_errors() {
        let err = decode_chunk(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, ChatError::Decode(_)));

        let err = decode_chunk(b"{not json").unwrap_err();
        assert!(matches!(err, ChatError::Decode(ref m) if m.starts_with("failed to parse stream chunk JSON")));
    }

    #[tokio::test]
    async fn missing_region_fails_before_any_request() {
        let client = BedrockClient::new(Arc::new(Config::default()));
        let creds = Credentials {
            identity_id: "id".into(),
            access_key_id: "AKIA".into(),
            secret_key: "s".into(),
            session_token: "t".into(),
            expiration: None,
        };
        let res = client
            .stream_completion(creds, "hello".into(), CancellationToken::new())
            .await;
        assert_eq!(res.err(), Some(ChatError::transport("missing configuration: region")));
    }

    #[tokio::test]
    async fn reader_skips_empty_chunks_and_foreign_events() {
        let out = drain(vec![
            Ok(Some(RawEvent::Chunk(None))),
            Ok(Some(RawEvent::Other("Unknown".into()))),
            Ok(Some(RawEvent::Chunk(Some(br#"{"type":"message_start"}"#.to_vec())))),
            delta("Hi"),
            delta(" there"),
            Ok(None),
        ])
        .await;

        assert_eq!(out, vec![text("Hi"), text(" there")]);
    }

    #[tokio::test]
    async fn transport_error_ends_stream_after_delivered_fragments() {
        let out = drain(vec![
            delta("one "),
            delta("two "),
            Err("connection reset by peer".into()),
            delta("never"),
        ])
        .await;

        assert_eq!(
            out,
            vec![
                text("one "),
                text("two "),
                Err(ChatError::transport("connection reset by peer")),
            ]
        );
    }

    #[tokio::test]
    async fn undecodable_chunk_ends_stream_with_decode_error() {
        let out = drain(vec![
            delta("ok"),
            Ok(Some(RawEvent::Chunk(Some(b"{oops".to_vec())))),
            delta("never"),
        ])
        .await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0], text("ok"));
        assert!(matches!(out[1], Err(ChatError::Decode(_))));
    }

    #[tokio::test]
    async fn cancel_interrupts_a_stalled_stream() {
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(8);
        let reader = tokio::spawn(pump(
            ScriptedEvents::new(vec![delta("partial")]),
            tx,
            cancel.clone(),
            "m".into(),
        ));

        assert_eq!(rx.recv().await, Some(text("partial")));
        cancel.cancel();
        assert_eq!(rx.recv().await, Some(Err(ChatError::Cancelled)));
        assert_eq!(rx.recv().await, None);
        reader.await.unwrap();
    }
}
