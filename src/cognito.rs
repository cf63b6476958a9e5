//! Shared plumbing for the Cognito JSON 1.1 APIs (user pools and identity pools).
//!
//! Both services take a POST to the service root with an `X-Amz-Target`
//! header naming the operation. The calls used here are unsigned.

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const AMZ_JSON: &str = "application/x-amz-json-1.1";

#[derive(Debug, Clone, Deserialize)]
struct ServiceError {
    #[serde(rename = "__type", default)]
    kind: Option<String>,
    #[serde(alias = "Message", default)]
    message: Option<String>,
}

/// Invoke `target` at `endpoint`. Failures come back as a human-readable reason.
pub async fn call<Req, Resp>(
    http: &reqwest::Client,
    endpoint: &str,
    target: &str,
    body: &Req,
) -> Result<Resp, String>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(AMZ_JSON));
    let target_value = HeaderValue::from_str(target).map_err(|e| e.to_string())?;
    headers.insert("x-amz-target", target_value);

    tracing::debug!(%endpoint, %target, "cognito request");

    let resp = http
        .post(endpoint)
        .headers(headers)
        .json(body)
        .send()
        .await
        .map_err(|e| format!("{target} request failed: {e}"))?;

    let status = resp.status();
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| format!("failed to read {target} response: {e}"))?;

    if !status.is_success() {
        return Err(error_reason(status, &bytes));
    }

    serde_json::from_slice(&bytes).map_err(|e| format!("failed to parse {target} response: {e}"))
}

/// Prefer the service's own `message`; fall back to status and raw body.
fn error_reason(status: reqwest::StatusCode, body: &[u8]) -> String {
    match serde_json::from_slice::<ServiceError>(body) {
        Ok(ServiceError { message: Some(msg), .. }) if !msg.is_empty() => msg,
        Ok(ServiceError { kind: Some(kind), .. }) => {
            // "com.amazonaws...#NotAuthorizedException" -> "NotAuthorizedException"
            kind.rsplit('#').next().unwrap_or(&kind).to_string()
        }
        _ => format!("HTTP {status}: {}", String::from_utf8_lossy(body)),
    }
}
