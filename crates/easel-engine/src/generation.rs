//! Text-to-image client.

use std::fs;
use std::path::{Path, PathBuf};

use easel_contracts::jobs::GenerationRequest;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::http::{build_http_client, download_bytes, response_json_or_error};
use crate::paths::generation_file_name;

const SERVICE: &str = "DashScope";

/// Produces local image files for a prompt.
pub trait ImageGenerator: Send + Sync {
    /// Returns the written paths in the order the service listed them.
    /// Files are named `{file_prefix}_{index}_{basename}` under `out_dir`.
    fn generate(
        &self,
        request: &GenerationRequest,
        out_dir: &Path,
        file_prefix: &str,
    ) -> Result<Vec<PathBuf>>;
}

pub struct DashScopeGenerator {
    endpoint: String,
    api_key: String,
    http: HttpClient,
}

impl DashScopeGenerator {
    pub fn new(config: &EngineConfig, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            endpoint: format!(
                "{}/services/aigc/text2image/image-synthesis",
                config.image_api_base
            ),
            api_key: api_key.into(),
            http: build_http_client(config.request_timeout)?,
        })
    }
}

impl ImageGenerator for DashScopeGenerator {
    fn generate(
        &self,
        request: &GenerationRequest,
        out_dir: &Path,
        file_prefix: &str,
    ) -> Result<Vec<PathBuf>> {
        debug!(model = %request.model, size = %request.size, n = request.count, "text2image request");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(&generation_payload(request))
            .send()?;
        let payload = response_json_or_error(SERVICE, response).map_err(|err| match err {
            EngineError::Vendor {
                status, message, ..
            } => EngineError::GenerationFailed(format!("status {status}: {message}")),
            other => other,
        })?;
        let urls = result_urls(&payload)?;

        fs::create_dir_all(out_dir)?;
        let mut written = Vec::with_capacity(urls.len());
        for (index, url) in urls.iter().enumerate() {
            let bytes = download_bytes(&self.http, SERVICE, url)?;
            let path = out_dir.join(generation_file_name(file_prefix, index, url));
            fs::write(&path, &bytes)?;
            info!(path = %path.display(), bytes = bytes.len(), "generated image saved");
            written.push(path);
        }
        Ok(written)
    }
}

fn generation_payload(request: &GenerationRequest) -> Value {
    json!({
        "model": request.model,
        "input": { "prompt": request.prompt },
        "parameters": {
            "size": request.size,
            "n": request.count,
        },
    })
}

/// Result URLs in response order. Entries that carry an error instead of a
/// URL are skipped; an empty list is a failure.
fn result_urls(payload: &Value) -> Result<Vec<String>> {
    let results = payload
        .get("output")
        .and_then(|output| output.get("results"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut urls = Vec::new();
    for result in &results {
        match result.get("url").and_then(Value::as_str) {
            Some(url) if !url.trim().is_empty() => urls.push(url.trim().to_string()),
            _ => {
                let reason = result
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("no url");
                warn!(reason, "skipping generation result without url");
            }
        }
    }
    if urls.is_empty() {
        let message = payload
            .get("output")
            .and_then(|output| output.get("message"))
            .or_else(|| payload.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("response contained no image urls");
        return Err(EngineError::GenerationFailed(message.to_string()));
    }
    Ok(urls)
}
