//! PaddleOCR-VL wire types shared by the sync and job APIs.
//!
//! Both APIs wrap the same `layoutParsingResults` structure; only the
//! envelope differs.

use serde::{Deserialize, Serialize};

use super::{LayoutBlock, LayoutError, LayoutResponse};

/// Request body for the synchronous layout-parsing endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutParsingRequest<'a> {
    /// Base64-encoded image.
    pub file: &'a str,
    /// 1 = image (0 = PDF).
    pub file_type: u8,
    pub use_doc_orientation_classify: bool,
    pub use_doc_unwarping: bool,
    pub use_chart_recognition: bool,
}

/// Optional pipeline switches, sent as a JSON string field to the job API.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionalPayload {
    pub use_doc_orientation_classify: bool,
    pub use_doc_unwarping: bool,
    pub use_chart_recognition: bool,
}

/// `{"result": {...}}` envelope (sync response body and each JSONL record).
#[derive(Debug, Deserialize)]
pub struct ResultEnvelope {
    #[serde(default)]
    pub result: LayoutParsingOutput,
}

#[derive(Debug, Default, Deserialize)]
pub struct LayoutParsingOutput {
    #[serde(rename = "layoutParsingResults", default)]
    pub layout_parsing_results: Vec<LayoutParsingResult>,
}

#[derive(Debug, Deserialize)]
pub struct LayoutParsingResult {
    #[serde(default)]
    pub markdown: MarkdownOutput,
    #[serde(rename = "prunedResult", default)]
    pub pruned_result: PrunedResult,
}

#[derive(Debug, Default, Deserialize)]
pub struct MarkdownOutput {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PrunedResult {
    #[serde(default)]
    pub parsing_res_list: Vec<ParsingBlock>,
}

#[derive(Debug, Deserialize)]
pub struct ParsingBlock {
    #[serde(default)]
    pub block_bbox: Option<Vec<f64>>,
    #[serde(default)]
    pub block_label: Option<String>,
    #[serde(default)]
    pub block_content: Option<String>,
}

impl LayoutParsingOutput {
    /// Take the first page's result. Blocks without a 4-element bbox are dropped.
    pub fn into_response(self) -> Result<LayoutResponse, LayoutError> {
        let first = self
            .layout_parsing_results
            .into_iter()
            .next()
            .ok_or(LayoutError::EmptyResult)?;

        let blocks = first
            .pruned_result
            .parsing_res_list
            .into_iter()
            .filter_map(|block| {
                let bbox = block.block_bbox?;
                if bbox.len() != 4 {
                    return None;
                }
                Some(LayoutBlock {
                    bbox: [bbox[0], bbox[1], bbox[2], bbox[3]],
                    label: block.block_label.unwrap_or_else(|| "text".to_string()),
                    content: block.block_content.unwrap_or_default(),
                })
            })
            .collect();

        Ok(LayoutResponse {
            markdown: first.markdown.text,
            blocks,
        })
    }
}

/// Parse a `{"result": {"layoutParsingResults": [...]}}` document.
pub fn parse_result_envelope(json: &str) -> Result<LayoutResponse, LayoutError> {
    let envelope: ResultEnvelope =
        serde_json::from_str(json).map_err(|e| LayoutError::ResponseParsing(e.to_string()))?;
    envelope.result.into_response()
}

// ──────────────────────────────────────────────
// Job API
// ──────────────────────────────────────────────

/// `POST /ocr/jobs` response.
#[derive(Debug, Deserialize)]
pub struct JobSubmitResponse {
    pub data: JobSubmitData,
}

#[derive(Debug, Deserialize)]
pub struct JobSubmitData {
    #[serde(rename = "jobId")]
    pub job_id: String,
}

/// `GET /ocr/jobs/{id}` response.
#[derive(Debug, Deserialize)]
pub struct JobStatusResponse {
    pub data: JobStatusData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusData {
    pub state: JobState,
    #[serde(default)]
    pub extract_progress: Option<ExtractProgress>,
    #[serde(default)]
    pub result_url: Option<ResultUrl>,
    #[serde(default)]
    pub error_msg: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Done,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractProgress {
    #[serde(default)]
    pub extracted_pages: Option<u32>,
    #[serde(default)]
    pub end_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultUrl {
    pub json_url: String,
}

/// Parse the first record of a JSONL result stream.
///
/// Later records (further pages of a multi-page upload) are ignored; the
/// pipeline submits one page per job.
pub fn parse_first_jsonl_record(body: &str) -> Result<LayoutResponse, LayoutError> {
    let first = body
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or(LayoutError::EmptyResult)?;
    parse_result_envelope(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYNC_RESPONSE: &str = r###"{
        "errorCode": 0,
        "result": {
            "layoutParsingResults": [{
                "markdown": {"text": "## 社論\n\n正文"},
                "prunedResult": {
                    "parsing_res_list": [
                        {"block_bbox": [10, 20, 300, 80], "block_label": "doc_title", "block_content": "社論"},
                        {"block_bbox": [10, 90, 300.5, 700], "block_label": "text", "block_content": "正文"},
                        {"block_bbox": [1, 2, 3], "block_label": "text"},
                        {"block_label": "image"}
                    ]
                }
            }]
        }
    }"###;

    #[test]
    fn parses_blocks_and_markdown() {
        let resp = parse_result_envelope(SYNC_RESPONSE).unwrap();
        assert_eq!(resp.markdown, "## 社論\n\n正文");
        assert_eq!(resp.blocks.len(), 2);
        assert_eq!(resp.blocks[0].label, "doc_title");
        assert_eq!(resp.blocks[0].bbox, [10.0, 20.0, 300.0, 80.0]);
        assert_eq!(resp.blocks[1].bbox[2], 300.5);
        assert_eq!(resp.blocks[1].content, "正文");
    }

    #[test]
    fn missing_label_defaults_to_text() {
        let json = r#"{"result":{"layoutParsingResults":[{"prunedResult":{"parsing_res_list":[{"block_bbox":[0,0,1,1]}]}}]}}"#;
        let resp = parse_result_envelope(json).unwrap();
        assert_eq!(resp.blocks[0].label, "text");
        assert!(resp.markdown.is_empty());
    }

    #[test]
    fn empty_results_are_an_error() {
        let err = parse_result_envelope(r#"{"result":{"layoutParsingResults":[]}}"#).unwrap_err();
        assert!(matches!(err, LayoutError::EmptyResult));
        let err = parse_result_envelope(r#"{}"#).unwrap_err();
        assert!(matches!(err, LayoutError::EmptyResult));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = parse_result_envelope("not json").unwrap_err();
        assert!(matches!(err, LayoutError::ResponseParsing(_)));
    }

    #[test]
    fn jsonl_uses_first_record_only() {
        let body = format!(
            "\n{}\n{}\n",
            r#"{"result":{"layoutParsingResults":[{"prunedResult":{"parsing_res_list":[{"block_bbox":[0,0,5,5],"block_label":"title"}]}}]}}"#,
            r#"{"result":{"layoutParsingResults":[{"prunedResult":{"parsing_res_list":[]}}]}}"#
        );
        let resp = parse_first_jsonl_record(&body).unwrap();
        assert_eq!(resp.blocks.len(), 1);
        assert_eq!(resp.blocks[0].label, "title");
    }

    #[test]
    fn empty_jsonl_is_an_error() {
        assert!(matches!(
            parse_first_jsonl_record("  \n\n"),
            Err(LayoutError::EmptyResult)
        ));
    }

    #[test]
    fn job_status_parses_states() {
        let done: JobStatusResponse = serde_json::from_str(
            r#"{"data":{"state":"done","extractProgress":{"extractedPages":1,"endTime":"2025-01-01 10:00:00"},
                "resultUrl":{"jsonUrl":"https://example.invalid/r.jsonl"}}}"#,
        )
        .unwrap();
        assert_eq!(done.data.state, JobState::Done);
        assert_eq!(done.data.result_url.unwrap().json_url, "https://example.invalid/r.jsonl");

        let failed: JobStatusResponse =
            serde_json::from_str(r#"{"data":{"state":"failed","errorMsg":"bad image"}}"#).unwrap();
        assert_eq!(failed.data.state, JobState::Failed);
        assert_eq!(failed.data.error_msg.as_deref(), Some("bad image"));

        let odd: JobStatusResponse =
            serde_json::from_str(r#"{"data":{"state":"queued"}}"#).unwrap();
        assert_eq!(odd.data.state, JobState::Unknown);
    }

    #[test]
    fn sync_request_uses_camel_case() {
        let req = LayoutParsingRequest {
            file: "AAAA",
            file_type: 1,
            use_doc_orientation_classify: false,
            use_doc_unwarping: false,
            use_chart_recognition: false,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["fileType"], 1);
        assert_eq!(json["useDocUnwarping"], false);
        assert_eq!(json["file"], "AAAA");
    }
}
