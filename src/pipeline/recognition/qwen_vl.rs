//! Qwen-VL recognizer over the DashScope multimodal-generation API.

use base64::Engine;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use super::prompt::build_prompt;
use super::{RecognitionError, RegionRecognizer};
use crate::pipeline::imaging::{encode_jpeg, ensure_min_side, fit_within, CROP_JPEG_QUALITY};
use crate::pipeline::region::RegionKind;

pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com";
pub const DEFAULT_MODEL: &str = "qwen-vl-max";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

const GENERATION_PATH: &str = "/api/v1/services/aigc/multimodal-generation/generation";

/// Regions smaller than this on their short side are upscaled before upload.
const MIN_REGION_SIDE: u32 = 200;

/// Error code DashScope returns when content inspection rejects an input.
const CONTENT_INSPECTION_CODE: &str = "DataInspectionFailed";

pub struct QwenVlClient {
    endpoint: String,
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
    max_region_size: u32,
}

impl QwenVlClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout_secs: u64,
        max_region_size: u32,
    ) -> Result<Self, RecognitionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RecognitionError::Http(e.to_string()))?;

        Ok(Self {
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), GENERATION_PATH),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
            max_region_size,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Bound the upload size, lift tiny crops, encode as JPEG data URL.
    fn prepare_image(&self, image: &DynamicImage) -> Result<String, RecognitionError> {
        let (bounded, _) = fit_within(image, self.max_region_size);
        let sized = ensure_min_side(bounded, MIN_REGION_SIDE);
        let jpeg = encode_jpeg(&sized, CROP_JPEG_QUALITY)
            .map_err(|e| RecognitionError::Image(e.to_string()))?;
        Ok(format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(jpeg)
        ))
    }
}

// ──────────────────────────────────────────────
// Wire types
// ──────────────────────────────────────────────

#[derive(Serialize)]
struct GenerationRequest<'a> {
    model: &'a str,
    input: GenerationInput<'a>,
}

#[derive(Serialize)]
struct GenerationInput<'a> {
    messages: Vec<UserMessage<'a>>,
}

#[derive(Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: Vec<ContentItem<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ContentItem<'a> {
    Image { image: &'a str },
    Text { text: &'a str },
}

#[derive(Deserialize)]
struct GenerationResponse {
    output: GenerationOutput,
}

#[derive(Deserialize)]
struct GenerationOutput {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: MessageContent,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Parts(Vec<ContentPart>),
    Plain(String),
}

#[derive(Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Pull the answer out of a 200 response body.
fn parse_generation(body: &str) -> Result<String, RecognitionError> {
    let parsed: GenerationResponse =
        serde_json::from_str(body).map_err(|e| RecognitionError::ResponseParsing(e.to_string()))?;
    let choice = parsed
        .output
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| RecognitionError::ResponseParsing("no choices in response".into()))?;
    let text = match choice.message.content {
        MessageContent::Parts(parts) => parts
            .into_iter()
            .next()
            .and_then(|p| p.text)
            .unwrap_or_default(),
        MessageContent::Plain(text) => text,
    };
    Ok(text.trim().to_string())
}

/// Classify a non-200 response.
fn classify_failure(status: u16, body: String) -> RecognitionError {
    match status {
        429 => RecognitionError::RateLimited(body),
        400 => match serde_json::from_str::<ErrorBody>(&body) {
            Ok(err) if err.code == CONTENT_INSPECTION_CODE => {
                RecognitionError::ContentPolicy(err.message)
            }
            _ => RecognitionError::Api { status, body },
        },
        _ => RecognitionError::Api { status, body },
    }
}

impl RegionRecognizer for QwenVlClient {
    fn recognize(
        &self,
        image: &DynamicImage,
        kind: RegionKind,
    ) -> Result<String, RecognitionError> {
        let data_url = self.prepare_image(image)?;
        let prompt = build_prompt(kind);
        let body = GenerationRequest {
            model: &self.model,
            input: GenerationInput {
                messages: vec![UserMessage {
                    role: "user",
                    content: vec![
                        ContentItem::Image { image: &data_url },
                        ContentItem::Text { text: &prompt },
                    ],
                }],
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    RecognitionError::Connection(self.endpoint.clone())
                } else if e.is_timeout() {
                    RecognitionError::Timeout(self.timeout_secs)
                } else {
                    RecognitionError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response.text().map_err(|e| {
            if e.is_timeout() {
                RecognitionError::Timeout(self.timeout_secs)
            } else {
                RecognitionError::Connection(e.to_string())
            }
        })?;

        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), text));
        }
        parse_generation(&text)
    }
}
