use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use slotforge_contracts::loras::LoraSpec;

use super::{GenerationJob, HealthReport, ImageBackend, ProgressSnapshot, MAX_VARIANTS};
use crate::artifact::ImageArtifact;
use crate::config::A1111Config;
use crate::error::EngineError;
use crate::http::{build_client, response_json_or_error};

const BACKEND_NAME: &str = "a1111";

/// Strips trailing slashes and anything from an accidental `sdapi` segment on.
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    let lowered = trimmed.to_ascii_lowercase();
    match lowered.find("sdapi") {
        Some(pos) => trimmed[..pos].trim_end_matches('/').to_string(),
        None => trimmed.to_string(),
    }
}

#[derive(Debug, Clone)]
enum Auth {
    Basic(String),
    Bearer(String),
}

/// Automatic1111 `sdapi/v1` client.
#[derive(Debug, Clone)]
pub struct A1111Backend {
    client: Client,
    base_url: String,
    auth: Option<Auth>,
}

impl A1111Backend {
    pub fn new(config: &A1111Config) -> Result<Self, EngineError> {
        let non_empty = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        // Basic auth wins when both are configured.
        let auth = non_empty(&config.basic_auth)
            .map(|credentials| Auth::Basic(BASE64.encode(credentials.as_bytes())))
            .or_else(|| non_empty(&config.bearer_token).map(Auth::Bearer));
        Ok(Self {
            client: build_client(BACKEND_NAME, config.timeout_secs)?,
            base_url: normalize_base_url(&config.base_url),
            auth,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/sdapi/v1/{path}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some(Auth::Basic(encoded)) => request.header(AUTHORIZATION, format!("Basic {encoded}")),
            Some(Auth::Bearer(token)) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value, EngineError> {
        let response = self
            .authorize(self.client.get(self.endpoint(path)))
            .send()
            .await
            .map_err(|err| EngineError::transport(BACKEND_NAME, err))?;
        response_json_or_error(BACKEND_NAME, response).await
    }

    fn txt2img_payload(job: &GenerationJob) -> Value {
        let (width, height) = job.dimensions_or_default();
        json!({
            "prompt": job.prompt,
            "negative_prompt": job.negative_prompt,
            "width": width,
            "height": height,
            "cfg_scale": job.cfg_scale,
            "steps": job.steps,
            "n_iter": job.variant_count_clamped(),
            "batch_size": 1,
            "sampler_name": job.sampler_or_default(),
        })
    }

    fn parse_images(payload: &Value) -> Result<Vec<ImageArtifact>, EngineError> {
        let Some(items) = payload.get("images").and_then(Value::as_array) else {
            return Err(EngineError::malformed(BACKEND_NAME, "response has no images array"));
        };
        let mut images = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            let Some(encoded) = item.as_str() else {
                return Err(EngineError::malformed(
                    BACKEND_NAME,
                    format!("image {idx} is not a base64 string"),
                ));
            };
            let artifact = ImageArtifact::from_base64(encoded).map_err(|err| {
                EngineError::malformed(BACKEND_NAME, format!("image {idx} base64 decode failed: {err}"))
            })?;
            images.push(artifact);
        }
        if images.is_empty() {
            return Err(EngineError::malformed(BACKEND_NAME, "response contained no images"));
        }
        Ok(images)
    }

    fn parse_progress(payload: &Value) -> ProgressSnapshot {
        let as_u32 = |value: Option<&Value>| {
            value
                .and_then(Value::as_u64)
                .and_then(|value| u32::try_from(value).ok())
        };
        let state = payload.get("state");
        ProgressSnapshot::from_fraction(
            payload.get("progress").and_then(Value::as_f64).unwrap_or(0.0),
            as_u32(state.and_then(|state| state.get("sampling_step"))),
            as_u32(state.and_then(|state| state.get("sampling_steps"))),
            payload.get("eta_relative").and_then(Value::as_f64),
        )
    }

    fn parse_loras(payload: &Value) -> Result<Vec<LoraSpec>, EngineError> {
        let Some(items) = payload.as_array() else {
            return Err(EngineError::malformed(BACKEND_NAME, "loras response is not an array"));
        };
        Ok(items
            .iter()
            .filter_map(|item| {
                let name = item.get("name").and_then(Value::as_str)?.trim();
                if name.is_empty() {
                    return None;
                }
                let alias = item
                    .get("alias")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|alias| !alias.is_empty())
                    .map(str::to_string);
                Some(LoraSpec {
                    name: name.to_string(),
                    alias,
                })
            })
            .collect())
    }
}

#[async_trait]
impl ImageBackend for A1111Backend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn txt2img(&self, job: &GenerationJob) -> Result<Vec<ImageArtifact>, EngineError> {
        let payload = Self::txt2img_payload(job);
        log::debug!(
            "a1111 txt2img {}x{} n_iter={}",
            payload["width"],
            payload["height"],
            payload["n_iter"]
        );
        let response = self
            .authorize(self.client.post(self.endpoint("txt2img")))
            .json(&payload)
            .send()
            .await
            .map_err(|err| EngineError::transport(BACKEND_NAME, err))?;
        let body = response_json_or_error(BACKEND_NAME, response).await?;
        Self::parse_images(&body)
    }

    async fn progress(&self) -> Result<ProgressSnapshot, EngineError> {
        let body = self.get_json("progress?skip_current_image=true").await?;
        Ok(Self::parse_progress(&body))
    }

    async fn loras(&self) -> Result<Vec<LoraSpec>, EngineError> {
        let body = self.get_json("loras").await?;
        Self::parse_loras(&body)
    }

    async fn health(&self) -> HealthReport {
        let mut report = HealthReport {
            ok: false,
            backend: BACKEND_NAME.to_string(),
            base_url: Some(self.base_url.clone()),
            status: String::new(),
            models: Vec::new(),
            supports_image_generation: true,
            max_images_per_request: MAX_VARIANTS,
        };
        match self.get_json("sd-models").await {
            Ok(body) => {
                report.ok = true;
                report.status = "reachable".to_string();
                report.models = body
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|item| {
                                item.get("model_name")
                                    .or_else(|| item.get("title"))
                                    .and_then(Value::as_str)
                                    .map(str::to_string)
                            })
                            .collect()
                    })
                    .unwrap_or_default();
            }
            Err(err) => report.status = err.to_string(),
        }
        report
    }
}
