use crate::credentials::Credentials;
use crate::error::ChatError;
use futures_core::future::BoxFuture;
use futures_core::stream::BoxStream;
use tokio_util::sync::CancellationToken;

/// One incremental piece of generated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFragment {
    pub text: String,
}

/// Finite, single-pass fragment sequence. A stream error ends it.
pub type FragmentStream = BoxStream<'static, Result<TextFragment, ChatError>>;

/// Streaming inference interface.
///
/// Each call opens exactly one fresh request; streams are never restarted.
pub trait InferenceClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start streaming a completion for a single user turn.
    ///
    /// `cancel` is observed at every chunk read; once fired the stream
    /// yields [`ChatError::Cancelled`] and ends.
    fn stream_completion(
        &self,
        credentials: Credentials,
        prompt: String,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<FragmentStream, ChatError>>;
}
