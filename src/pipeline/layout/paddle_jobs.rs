//! Job-based PaddleOCR-VL client: submit, poll, then fetch a JSONL result.
//!
//! Large pages that time out on the synchronous endpoint go through here.
//! A poll that fails or returns non-200 is logged and retried until the
//! overall timeout expires.

use std::time::{Duration, Instant};

use reqwest::blocking::multipart::{Form, Part};

use super::paddle_types::{
    parse_first_jsonl_record, JobState, JobStatusResponse, JobSubmitResponse, OptionalPayload,
};
use super::{map_http_error, LayoutClient, LayoutError, LayoutRequest, LayoutResponse};

/// Default job endpoint of the hosted service.
pub const DEFAULT_JOB_URL: &str = "https://paddleocr.aistudio-app.com/api/v2/ocr/jobs";

/// Model name sent with every job.
pub const JOB_MODEL: &str = "PaddleOCR-VL-1.5";

/// Per-request timeout for submit, poll and fetch calls.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Use the configured URL only when it actually points at the job API.
pub fn resolve_job_url(configured: Option<&str>) -> String {
    match configured {
        Some(url) if url.contains("ocr/jobs") => url.trim_end_matches('/').to_string(),
        _ => DEFAULT_JOB_URL.to_string(),
    }
}

pub struct PaddleJobClient {
    job_url: String,
    token: String,
    client: reqwest::blocking::Client,
    poll_interval: Duration,
    timeout: Duration,
}

impl PaddleJobClient {
    /// `timeout` bounds the whole submit-poll-fetch cycle for one page.
    pub fn new(
        job_url: &str,
        token: &str,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Self, LayoutError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| LayoutError::Http(e.to_string()))?;

        Ok(Self {
            job_url: job_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
            poll_interval,
            timeout,
        })
    }

    fn auth(&self) -> String {
        format!("bearer {}", self.token)
    }

    fn submit(&self, request: &LayoutRequest<'_>) -> Result<String, LayoutError> {
        let payload = serde_json::to_string(&OptionalPayload::default())
            .map_err(|e| LayoutError::ResponseParsing(e.to_string()))?;
        let part = Part::bytes(request.bytes.to_vec()).file_name(request.file_name.to_string());
        let form = Form::new()
            .text("model", JOB_MODEL)
            .text("optionalPayload", payload)
            .part("file", part);

        let response = self
            .client
            .post(&self.job_url)
            .header("Authorization", self.auth())
            .multipart(form)
            .send()
            .map_err(|e| map_http_error(e, &self.job_url, REQUEST_TIMEOUT_SECS))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LayoutError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: JobSubmitResponse = response
            .json()
            .map_err(|e| LayoutError::ResponseParsing(e.to_string()))?;
        Ok(parsed.data.job_id)
    }

    /// Poll until the job is done; returns the JSONL result URL.
    fn wait_for_result(&self, job_id: &str, started: Instant) -> Result<String, LayoutError> {
        let status_url = format!("{}/{}", self.job_url, job_id);
        loop {
            if started.elapsed() >= self.timeout {
                return Err(LayoutError::JobTimeout {
                    job_id: job_id.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }

            match self.poll_once(&status_url) {
                Ok(status) => match status.data.state {
                    JobState::Done => {
                        if let Some(progress) = &status.data.extract_progress {
                            tracing::info!(
                                job_id,
                                pages = ?progress.extracted_pages,
                                end_time = progress.end_time.as_deref().unwrap_or(""),
                                "Layout job finished"
                            );
                        }
                        return status.data.result_url.map(|r| r.json_url).ok_or_else(|| {
                            LayoutError::ResponseParsing("done job has no resultUrl".into())
                        });
                    }
                    JobState::Failed => {
                        return Err(LayoutError::JobFailed {
                            job_id: job_id.to_string(),
                            message: status.data.error_msg.unwrap_or_default(),
                        });
                    }
                    state => {
                        tracing::debug!(job_id, ?state, "Layout job in progress");
                    }
                },
                Err(e) => {
                    tracing::warn!(job_id, error = %e, "Layout job poll failed, retrying");
                }
            }

            std::thread::sleep(self.poll_interval);
        }
    }

    fn poll_once(&self, status_url: &str) -> Result<JobStatusResponse, LayoutError> {
        let response = self
            .client
            .get(status_url)
            .header("Authorization", self.auth())
            .send()
            .map_err(|e| map_http_error(e, status_url, REQUEST_TIMEOUT_SECS))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LayoutError::Api {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .map_err(|e| LayoutError::ResponseParsing(e.to_string()))
    }

    fn fetch_result(&self, json_url: &str) -> Result<LayoutResponse, LayoutError> {
        let response = self
            .client
            .get(json_url)
            .send()
            .map_err(|e| map_http_error(e, json_url, REQUEST_TIMEOUT_SECS))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LayoutError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .map_err(|e| LayoutError::ResponseParsing(e.to_string()))?;
        parse_first_jsonl_record(&body)
    }
}

impl LayoutClient for PaddleJobClient {
    fn name(&self) -> &str {
        "paddlevl-jobs"
    }

    fn fetch_regions(&self, request: &LayoutRequest<'_>) -> Result<LayoutResponse, LayoutError> {
        let _span = tracing::info_span!(
            "layout_job",
            file = request.file_name,
            bytes = request.bytes.len()
        )
        .entered();

        let started = Instant::now();
        let job_id = self.submit(request)?;
        tracing::info!(job_id = %job_id, "Layout job submitted");

        let json_url = self.wait_for_result(&job_id, started)?;
        let parsed = self.fetch_result(&json_url)?;

        tracing::info!(
            job_id = %job_id,
            blocks = parsed.blocks.len(),
            elapsed_s = started.elapsed().as_secs(),
            "Layout job result fetched"
        );
        Ok(parsed)
    }
}
