//! Conversation view state and the submission pipeline that feeds it.
//!
//! The state machine is `Idle -> Submitting -> (Idle | Failed)`. `Failed` is
//! not terminal: a new submit moves straight back to `Submitting`. The
//! pipeline runs on its own task and reports [`PipelineEvent`]s, so the UI
//! loop stays responsive while fragments arrive.

use crate::auth::Session;
use crate::credentials::CredentialBroker;
use crate::error::ChatError;
use crate::provider::InferenceClient;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Submitting,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Fragment(String),
    Finished,
    Failed(ChatError),
}

/// What an accepted submit hands to the pipeline.
#[derive(Debug, Clone)]
pub struct Submission {
    pub prompt: String,
    pub cancel: CancellationToken,
}

#[derive(Debug, Default)]
pub struct Conversation {
    draft: String,
    response: String,
    error: Option<String>,
    phase: Phase,
    cancel: Option<CancellationToken>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_loading(&self) -> bool {
        self.phase == Phase::Submitting
    }

    pub fn can_submit(&self) -> bool {
        !self.is_loading() && !self.draft.is_empty()
    }

    /// Mutate the draft. Rejected (returns false) while a submission is in flight.
    pub fn edit_draft(&mut self, edit: impl FnOnce(&mut String)) -> bool {
        if self.is_loading() {
            return false;
        }
        edit(&mut self.draft);
        true
    }

    pub fn set_draft(&mut self, text: impl Into<String>) -> bool {
        let text = text.into();
        self.edit_draft(|d| *d = text)
    }

    /// Start a submission if the guard allows it.
    ///
    /// The draft is left as is so it can be edited and sent again.
    pub fn submit(&mut self) -> Option<Submission> {
        if !self.can_submit() {
            tracing::debug!(phase = ?self.phase, "submit rejected");
            return None;
        }

        let cancel = CancellationToken::new();
        self.error = None;
        self.response.clear();
        self.phase = Phase::Submitting;
        self.cancel = Some(cancel.clone());

        Some(Submission {
            prompt: self.draft.clone(),
            cancel,
        })
    }

    pub fn apply(&mut self, event: PipelineEvent) {
        if !self.is_loading() {
            // Late event from a submission that already settled.
            return;
        }

        match event {
            PipelineEvent::Fragment(text) => self.response.push_str(&text),
            PipelineEvent::Finished => {
                self.phase = Phase::Idle;
                self.cancel = None;
            }
            PipelineEvent::Failed(err) => {
                self.error = Some(err.to_string());
                self.phase = Phase::Failed;
                self.cancel = None;
            }
        }
    }

    /// Fire the in-flight submission's cancellation token, if any.
    pub fn cancel(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
    }

    /// Apply events from `rx` until the current submission settles.
    ///
    /// `observe` sees every event before it is applied.
    pub async fn drive(
        &mut self,
        rx: &mut mpsc::UnboundedReceiver<PipelineEvent>,
        mut observe: impl FnMut(&PipelineEvent),
    ) {
        while self.is_loading() {
            let event = match rx.recv().await {
                Some(ev) => ev,
                None => PipelineEvent::Failed(ChatError::transport("submission ended unexpectedly")),
            };
            observe(&event);
            self.apply(event);
        }
    }
}

/// Broker and client shared by every submission of one signed-in user.
#[derive(Clone)]
pub struct Pipeline {
    broker: Arc<dyn CredentialBroker>,
    client: Arc<dyn InferenceClient>,
}

impl Pipeline {
    pub fn new(broker: Arc<dyn CredentialBroker>, client: Arc<dyn InferenceClient>) -> Self {
        Self { broker, client }
    }

    /// Run one submission on a new task, reporting progress on the returned channel.
    pub fn spawn(&self, session: Session, submission: Submission) -> mpsc::UnboundedReceiver<PipelineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let this = self.clone();
        tokio::spawn(async move {
            this.run(session, submission, tx).await;
        });
        rx
    }

    /// Credentials, then the stream; each step races the submission's cancellation token.
    pub async fn run(&self, session: Session, submission: Submission, tx: mpsc::UnboundedSender<PipelineEvent>) {
        let Submission { prompt, cancel } = submission;
        tracing::info!(client = self.client.name(), username = %session.username, "submission started");

        let result = async {
            let creds = until_cancelled(&cancel, self.broker.obtain_credentials(session)).await?;
            let mut stream =
                until_cancelled(&cancel, self.client.stream_completion(creds, prompt, cancel.clone())).await?;

            let mut fragments = 0usize;
            while let Some(item) = until_cancelled(&cancel, async { Ok(stream.next().await) }).await? {
                let fragment = item?;
                fragments += 1;
                if tx.send(PipelineEvent::Fragment(fragment.text)).is_err() {
                    // Receiver gone; nobody is watching this submission anymore.
                    break;
                }
            }
            Ok::<_, ChatError>(fragments)
        }
        .await;

        let event = match result {
            Ok(fragments) => {
                tracing::info!(fragments, "submission finished");
                PipelineEvent::Finished
            }
            Err(err) => {
                tracing::warn!(error = %err, "submission failed");
                PipelineEvent::Failed(err)
            }
        };
        let _ = tx.send(event);
    }
}

async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, ChatError>>,
) -> Result<T, ChatError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ChatError::Cancelled),
        res = fut => res,
    }
}
