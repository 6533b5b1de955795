//! Canvas extension as an asynchronous remote job.
//!
//! `OutpaintClient` drives one job through
//! `Submitted -> Polling -> {Downloaded, Failed, TimedOut}`. Two independent
//! budgets apply: the overall deadline measured from submission, and the
//! per-call retry counters for status queries and the result download.
//! Neither budget resets the other.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use easel_contracts::jobs::{JobStatus, OutpaintJob, OutpaintRequest, StoredImage};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::{EngineConfig, OutpaintPolicy};
use crate::error::{EngineError, Result};
use crate::http::{build_http_client, download_bytes, response_json_or_error};
use crate::paths::outpaint_destination;

const SERVICE: &str = "DashScope";

/// Monotonic time source. The poll loop only ever reads elapsed time and
/// sleeps through this, so tests can run it on a virtual clock.
pub trait Clock: Send + Sync {
    /// Time since an arbitrary fixed origin.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// One status query answer, normalised from the vendor's task states.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: JobStatus,
    pub vendor_status: String,
    pub result_url: Option<String>,
    pub message: Option<String>,
}

/// The three remote calls of the outpaint protocol.
pub trait OutpaintTransport: Send + Sync {
    /// Returns the task identifier.
    fn submit(&self, request: &OutpaintRequest, source_data_uri: &str) -> Result<String>;
    fn status(&self, task_id: &str) -> Result<StatusReport>;
    fn download(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutpaintState {
    Submitted,
    Polling,
    Downloaded,
    Failed,
    TimedOut,
}

impl OutpaintState {
    /// Terminal state a failed run ended in.
    pub fn of_error(err: &EngineError) -> Self {
        match err {
            EngineError::Timeout { .. } => Self::TimedOut,
            _ => Self::Failed,
        }
    }
}

/// Milestones reported while a job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum OutpaintProgress {
    Submitted { task_id: String },
    Pending { task_id: String, polls: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutpaintOutcome {
    pub task_id: String,
    pub state: OutpaintState,
    pub image: StoredImage,
    pub polls: u32,
    /// Interval waits spent between status queries.
    pub waits: u32,
    /// Status queries that errored and were tolerated.
    pub poll_retries: u32,
    pub download_attempts: u32,
}

/// Runs a whole outpaint request. Implemented by the remote client and the
/// offline dry-run backend.
pub trait Outpainter: Send + Sync {
    fn outpaint(
        &self,
        request: &OutpaintRequest,
        out_dir: &Path,
        progress: &mut dyn FnMut(OutpaintProgress),
    ) -> Result<OutpaintOutcome>;
}

#[derive(Debug, Clone, PartialEq)]
struct PollResult {
    result_url: String,
    polls: u32,
    waits: u32,
    retries: u32,
}

pub struct OutpaintClient {
    transport: Arc<dyn OutpaintTransport>,
    clock: Arc<dyn Clock>,
    policy: OutpaintPolicy,
}

impl OutpaintClient {
    pub fn new(
        transport: Arc<dyn OutpaintTransport>,
        clock: Arc<dyn Clock>,
        policy: OutpaintPolicy,
    ) -> Self {
        Self {
            transport,
            clock,
            policy,
        }
    }

    /// Remote client on the wall clock.
    pub fn dashscope(config: &EngineConfig, api_key: impl Into<String>) -> Result<Self> {
        let transport = DashScopeOutpaintTransport::new(config, api_key)?;
        Ok(Self::new(
            Arc::new(transport),
            Arc::new(SystemClock::default()),
            config.outpaint.clone(),
        ))
    }

    /// Encodes the source and submits the job. Transport and vendor errors
    /// surface as `SubmissionFailed`; codec errors surface unchanged.
    pub fn submit(&self, request: &OutpaintRequest) -> Result<String> {
        request
            .scales
            .validate()
            .map_err(|reason| EngineError::SubmissionFailed(format!("invalid scales: {reason}")))?;
        let data_uri = codec::encode_path(&request.source)?;
        let task_id = self
            .transport
            .submit(request, &data_uri)
            .map_err(|err| match err {
                EngineError::SubmissionFailed(message) => EngineError::SubmissionFailed(message),
                other => EngineError::SubmissionFailed(other.to_string()),
            })?;
        let task_id = task_id.trim().to_string();
        if task_id.is_empty() {
            return Err(EngineError::SubmissionFailed(
                "response did not include a task id".to_string(),
            ));
        }
        info!(%task_id, model = %request.model, direction = %request.direction, "outpaint submitted");
        Ok(task_id)
    }

    fn poll(
        &self,
        task_id: &str,
        submitted_at: Duration,
        progress: &mut dyn FnMut(OutpaintProgress),
    ) -> Result<PollResult> {
        let mut job = OutpaintJob::new(task_id);
        let mut polls = 0u32;
        let mut waits = 0u32;
        let mut retries = 0u32;
        loop {
            let waited = self.clock.now().saturating_sub(submitted_at);
            if waited > self.policy.timeout {
                return Err(EngineError::Timeout {
                    task_id: task_id.to_string(),
                    waited_s: waited.as_secs_f64(),
                });
            }

            polls += 1;
            match self.transport.status(task_id) {
                Ok(report) => {
                    debug!(%task_id, status = %report.vendor_status, polls, "outpaint status");
                    job.observe(report.status, report.result_url, report.message)
                        .map_err(EngineError::OutpaintFailed)?;
                    match job.status() {
                        JobStatus::Succeeded => {
                            let Some(url) = job.result_url() else {
                                return Err(EngineError::OutpaintFailed(
                                    "job succeeded without a result url".to_string(),
                                ));
                            };
                            return Ok(PollResult {
                                result_url: url.to_string(),
                                polls,
                                waits,
                                retries,
                            });
                        }
                        JobStatus::Failed => {
                            return Err(EngineError::OutpaintFailed(
                                job.error().unwrap_or("unknown error").to_string(),
                            ));
                        }
                        JobStatus::Pending => progress(OutpaintProgress::Pending {
                            task_id: task_id.to_string(),
                            polls,
                        }),
                    }
                }
                Err(err) => {
                    retries += 1;
                    warn!(%task_id, retries, max = self.policy.max_poll_retries, error = %err, "outpaint status query failed");
                    if retries > self.policy.max_poll_retries {
                        return Err(EngineError::PollingFailed {
                            retries,
                            message: err.to_string(),
                        });
                    }
                }
            }

            self.clock.sleep(self.policy.poll_interval);
            waits += 1;
        }
    }

    /// Fetches `url` into `out_dir`, retrying transport failures with a fixed
    /// backoff. Returns the stored image and the number of attempts used.
    pub fn download(&self, url: &str, out_dir: &Path) -> Result<(StoredImage, u32)> {
        let attempts = self.policy.download_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.transport.download(url) {
                Ok(bytes) => {
                    let local_path = outpaint_destination(out_dir, url);
                    if let Some(parent) = local_path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&local_path, &bytes)?;
                    info!(path = %local_path.display(), bytes = bytes.len(), attempt, "outpaint result saved");
                    return Ok((
                        StoredImage {
                            local_path,
                            source_url: url.to_string(),
                            size_bytes: bytes.len() as u64,
                        },
                        attempt,
                    ));
                }
                Err(err) if err.is_transport() => {
                    warn!(attempt, attempts, error = %err, "outpaint download failed");
                    last_error = err.to_string();
                    if attempt < attempts {
                        self.clock.sleep(self.policy.download_backoff);
                    }
                }
                Err(err) => {
                    return Err(EngineError::DownloadFailed {
                        url: url.to_string(),
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
            }
        }
        Err(EngineError::DownloadFailed {
            url: url.to_string(),
            attempts,
            message: last_error,
        })
    }
}

impl Outpainter for OutpaintClient {
    fn outpaint(
        &self,
        request: &OutpaintRequest,
        out_dir: &Path,
        progress: &mut dyn FnMut(OutpaintProgress),
    ) -> Result<OutpaintOutcome> {
        let submitted_at = self.clock.now();
        let task_id = self.submit(request)?;
        progress(OutpaintProgress::Submitted {
            task_id: task_id.clone(),
        });
        let polled = self.poll(&task_id, submitted_at, progress)?;
        let (image, download_attempts) = self.download(&polled.result_url, out_dir)?;
        Ok(OutpaintOutcome {
            task_id,
            state: OutpaintState::Downloaded,
            image,
            polls: polled.polls,
            waits: polled.waits,
            poll_retries: polled.retries,
            download_attempts,
        })
    }
}

/// DashScope image2image `expand` function.
pub struct DashScopeOutpaintTransport {
    submit_endpoint: String,
    tasks_endpoint: String,
    api_key: String,
    http: HttpClient,
}

impl DashScopeOutpaintTransport {
    pub fn new(config: &EngineConfig, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            submit_endpoint: format!(
                "{}/services/aigc/image2image/image-synthesis",
                config.image_api_base
            ),
            tasks_endpoint: format!("{}/tasks", config.image_api_base),
            api_key: api_key.into(),
            http: build_http_client(config.request_timeout)?,
        })
    }
}

impl OutpaintTransport for DashScopeOutpaintTransport {
    fn submit(&self, request: &OutpaintRequest, source_data_uri: &str) -> Result<String> {
        let response = self
            .http
            .post(&self.submit_endpoint)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .header("X-DashScope-Async", "enable")
            .json(&submission_payload(request, source_data_uri))
            .send()?;
        let payload = response_json_or_error(SERVICE, response)?;
        payload
            .get("output")
            .and_then(|output| output.get("task_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                EngineError::SubmissionFailed(format!(
                    "response did not include a task id: {}",
                    payload.get("message").and_then(Value::as_str).unwrap_or("")
                ))
            })
    }

    fn status(&self, task_id: &str) -> Result<StatusReport> {
        let url = format!("{}/{}", self.tasks_endpoint, urlencoding::encode(task_id));
        let response = self.http.get(&url).bearer_auth(&self.api_key).send()?;
        let payload = response_json_or_error(SERVICE, response)?;
        Ok(parse_status(&payload))
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        download_bytes(&self.http, SERVICE, url)
    }
}

fn submission_payload(request: &OutpaintRequest, source_data_uri: &str) -> Value {
    let mut parameters = Map::new();
    parameters.insert("top_scale".to_string(), json!(request.scales.top));
    parameters.insert("bottom_scale".to_string(), json!(request.scales.bottom));
    parameters.insert("left_scale".to_string(), json!(request.scales.left));
    parameters.insert("right_scale".to_string(), json!(request.scales.right));
    parameters.insert("n".to_string(), json!(request.count.max(1)));
    if let Some(seed) = request.seed {
        parameters.insert("seed".to_string(), json!(seed));
    }
    json!({
        "model": request.model,
        "input": {
            "function": "expand",
            "prompt": request.prompt,
            "base_image_url": source_data_uri,
        },
        "parameters": Value::Object(parameters),
    })
}

fn vendor_job_status(raw: &str) -> JobStatus {
    match raw.to_ascii_uppercase().as_str() {
        "SUCCEEDED" => JobStatus::Succeeded,
        "FAILED" | "CANCELED" | "UNKNOWN" => JobStatus::Failed,
        _ => JobStatus::Pending,
    }
}

fn parse_status(payload: &Value) -> StatusReport {
    let output = payload.get("output").cloned().unwrap_or(Value::Null);
    let vendor_status = output
        .get("task_status")
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN")
        .to_string();
    let result_url = output
        .get("results")
        .and_then(Value::as_array)
        .and_then(|results| {
            results
                .iter()
                .find_map(|result| result.get("url").and_then(Value::as_str))
        })
        .or_else(|| output.get("output_image_url").and_then(Value::as_str))
        .map(str::to_string);
    let message = output
        .get("message")
        .or_else(|| payload.get("message"))
        .and_then(Value::as_str)
        .map(|message| match output.get("code").and_then(Value::as_str) {
            Some(code) => format!("{code}: {message}"),
            None => message.to_string(),
        });
    StatusReport {
        status: vendor_job_status(&vendor_status),
        vendor_status,
        result_url,
        message,
    }
}
