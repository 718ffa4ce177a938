use std::time::Duration;

use reqwest::{Client, Response};
use serde_json::Value;

use crate::error::{truncate_text, EngineError};

const ERROR_BODY_MAX_CHARS: usize = 512;

pub(crate) fn build_client(backend: &str, timeout_secs: Option<u64>) -> Result<Client, EngineError> {
    let mut builder = Client::builder();
    if let Some(secs) = timeout_secs.filter(|secs| *secs > 0) {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder
        .build()
        .map_err(|err| EngineError::Configuration(format!("{backend} client setup failed: {err}")))
}

/// Reads the body, mapping non-2xx statuses and invalid JSON to typed errors.
pub(crate) async fn response_json_or_error(
    backend: &str,
    response: Response,
) -> Result<Value, EngineError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| EngineError::transport(backend, err))?;
    if !status.is_success() {
        return Err(EngineError::Backend {
            backend: backend.to_string(),
            status: status.as_u16(),
            message: truncate_text(body.trim(), ERROR_BODY_MAX_CHARS),
        });
    }
    serde_json::from_str(&body).map_err(|err| {
        EngineError::malformed(backend, format!("invalid JSON payload: {err}"))
    })
}
