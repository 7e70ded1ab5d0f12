use base64::Engine;

use super::paddle_types::{parse_result_envelope, LayoutParsingRequest};
use super::{map_http_error, LayoutClient, LayoutError, LayoutRequest, LayoutResponse};

/// Hosted PaddleOCR-VL layout parsing, one blocking request per page.
pub struct PaddleVlClient {
    api_url: String,
    token: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl PaddleVlClient {
    pub fn new(api_url: &str, token: &str, timeout_secs: u64) -> Result<Self, LayoutError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LayoutError::Http(e.to_string()))?;

        Ok(Self {
            api_url: api_url.to_string(),
            token: token.to_string(),
            client,
            timeout_secs,
        })
    }
}

impl LayoutClient for PaddleVlClient {
    fn name(&self) -> &str {
        "paddlevl"
    }

    fn fetch_regions(&self, request: &LayoutRequest<'_>) -> Result<LayoutResponse, LayoutError> {
        let _span = tracing::info_span!(
            "layout_request",
            file = request.file_name,
            bytes = request.bytes.len()
        )
        .entered();

        let encoded = base64::engine::general_purpose::STANDARD.encode(request.bytes);
        let body = LayoutParsingRequest {
            file: &encoded,
            file_type: 1,
            use_doc_orientation_classify: false,
            use_doc_unwarping: false,
            use_chart_recognition: false,
        };

        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("token {}", self.token))
            .json(&body)
            .send()
            .map_err(|e| map_http_error(e, &self.api_url, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LayoutError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .map_err(|e| LayoutError::ResponseParsing(e.to_string()))?;
        let parsed = parse_result_envelope(&text)?;

        tracing::info!(
            blocks = parsed.blocks.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Layout analysis complete"
        );
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stub_http::StubServer;

    fn page() -> LayoutRequest<'static> {
        LayoutRequest {
            file_name: "p.jpg",
            bytes: b"jpeg-bytes",
            width: 400,
            height: 300,
        }
    }

    #[test]
    fn posts_base64_page_and_parses_blocks() {
        let server = StubServer::start(|_| {
            vec![(
                200,
                r#"{"errorCode":0,"result":{"layoutParsingResults":[{"markdown":{"text":"raw md"},
                    "prunedResult":{"parsing_res_list":[
                        {"block_bbox":[0,0,100,40],"block_label":"doc_title","block_content":"大公報"},
                        {"block_bbox":[0,50,100,300],"block_label":"text"}]}}]}}"#
                    .to_string(),
            )]
        });
        let client = PaddleVlClient::new(&server.url("/layout-parsing"), "tok", 10).unwrap();

        let response = client.fetch_regions(&page()).unwrap();
        assert_eq!(response.markdown, "raw md");
        assert_eq!(response.blocks.len(), 2);
        assert_eq!(response.blocks[0].content, "大公報");
        assert_eq!(response.blocks[1].bbox, [0.0, 50.0, 100.0, 300.0]);

        let requests = server.finish();
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].path, "/layout-parsing");
        assert_eq!(requests[0].header("authorization"), Some("token tok"));
        let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(
            sent["file"],
            base64::engine::general_purpose::STANDARD.encode(b"jpeg-bytes")
        );
        assert_eq!(sent["fileType"], 1);
        assert_eq!(sent["useDocUnwarping"], false);
    }

    #[test]
    fn error_status_is_api_error_with_body() {
        let server = StubServer::start(|_| vec![(504, "gateway timeout".to_string())]);
        let client = PaddleVlClient::new(&server.url("/layout-parsing"), "tok", 10).unwrap();
        let err = client.fetch_regions(&page()).unwrap_err();
        assert!(matches!(err, LayoutError::Api { status: 504, ref body } if body == "gateway timeout"));
        server.finish();
    }

    #[test]
    fn empty_result_list_is_empty_result() {
        let server = StubServer::start(|_| {
            vec![(200, r#"{"result":{"layoutParsingResults":[]}}"#.to_string())]
        });
        let client = PaddleVlClient::new(&server.url("/layout-parsing"), "tok", 10).unwrap();
        let err = client.fetch_regions(&page()).unwrap_err();
        assert!(matches!(err, LayoutError::EmptyResult));
        server.finish();
    }

    #[test]
    fn unreachable_endpoint_is_connection_or_http_error() {
        let client = PaddleVlClient::new("http://127.0.0.1:9/layout-parsing", "t", 2).unwrap();
        let req = LayoutRequest {
            file_name: "p.jpg",
            bytes: b"jpeg",
            width: 1,
            height: 1,
        };
        let err = client.fetch_regions(&req).unwrap_err();
        assert!(matches!(
            err,
            LayoutError::Connection(_) | LayoutError::Http(_) | LayoutError::Timeout(_)
        ));
    }

    #[test]
    fn client_reports_name() {
        let client = PaddleVlClient::new("https://example.invalid", "t", 5).unwrap();
        assert_eq!(client.name(), "paddlevl");
    }
}
