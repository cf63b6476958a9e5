use crate::auth::{IdentityProvider, UserPoolClient};
use crate::config::Config;
use crate::conversation::{Pipeline, PipelineEvent};
use crate::credentials::CognitoBroker;
use crate::gate::{Gate, SignInForm};
use crate::provider::bedrock::BedrockClient;
use crate::stub;
use anyhow::{anyhow, Context};
use std::io::Write;
use std::sync::Arc;

/// The three service seams one run talks to.
#[derive(Clone)]
pub struct Backend {
    pub identity: Arc<dyn IdentityProvider>,
    pub pipeline: Pipeline,
}

pub fn build_backend(http: &reqwest::Client, cfg: Arc<Config>, backend_name: &str) -> anyhow::Result<Backend> {
    match backend_name {
        "aws" => {
            let identity: Arc<dyn IdentityProvider> = Arc::new(UserPoolClient::new(http.clone(), cfg.clone()));
            let broker = CognitoBroker::new(http.clone(), cfg.clone(), identity.clone());
            let client = BedrockClient::new(cfg);
            Ok(Backend {
                identity,
                pipeline: Pipeline::new(Arc::new(broker), Arc::new(client)),
            })
        }
        "stub" => Ok(Backend {
            identity: Arc::new(stub::StubIdentity::new()),
            pipeline: Pipeline::new(Arc::new(stub::StubBroker::new()), Arc::new(stub::StubClient::new())),
        }),
        other => anyhow::bail!("unknown backend: {other}"),
    }
}

/// Password from `BEDROCK_CHAT_PASSWORD`, else one line from stdin.
pub fn read_password() -> anyhow::Result<String> {
    if let Ok(pw) = std::env::var("BEDROCK_CHAT_PASSWORD") {
        return Ok(pw);
    }

    eprint!("Password: ");
    std::io::stderr().flush().ok();
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).context("failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Sign in, stream one completion into `out`, and sign out again.
pub async fn run_prompt(
    backend: &Backend,
    form: SignInForm,
    prompt: String,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    if !form.is_complete() {
        anyhow::bail!("username and password are required (use --username and BEDROCK_CHAT_PASSWORD)");
    }

    tracing::debug!(identity = backend.identity.name(), username = %form.username, "signing in");
    let session = backend
        .identity
        .sign_in(form.username, form.password)
        .await
        .context("sign-in failed")?;

    let mut gate = Gate::default();
    gate.signed_in(session.clone());
    let conv = gate
        .conversation_mut()
        .ok_or_else(|| anyhow!("no conversation after sign-in"))?;

    conv.set_draft(prompt);
    let submission = conv.submit().ok_or_else(|| anyhow!("prompt is empty"))?;
    let mut rx = backend.pipeline.spawn(session, submission);

    let mut write_err = None;
    conv.drive(&mut rx, |ev| {
        if let PipelineEvent::Fragment(text) = ev {
            if let Err(e) = write!(out, "{text}").and_then(|_| out.flush()) {
                write_err.get_or_insert(e);
            }
        }
    })
    .await;
    writeln!(out).ok();

    if let Some(e) = write_err {
        return Err(anyhow::Error::new(e).context("failed to write response"));
    }
    if let Some(err) = conv.error() {
        anyhow::bail!("{err}");
    }

    gate.sign_out();
    Ok(())
}
