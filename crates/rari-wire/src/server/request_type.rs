use axum::http::HeaderMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Document,
    RscStream,
}

pub struct RequestTypeDetector;

impl RequestTypeDetector {
    pub fn detect_render_mode(headers: &HeaderMap) -> RenderMode {
        if let Some(rsc) = headers.get("rsc")
            && rsc.as_bytes() == b"1"
        {
            return RenderMode::RscStream;
        }

        if let Some(accept) = headers.get("accept")
            && let Ok(accept_str) = accept.to_str()
            && accept_str.contains("text/x-component")
        {
            return RenderMode::RscStream;
        }

        RenderMode::Document
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn test_detect_document_mode_with_html_accept() {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("text/html"));

        let mode = RequestTypeDetector::detect_render_mode(&headers);
        assert_eq!(mode, RenderMode::Document);
    }

    #[test]
    fn test_detect_rsc_stream_mode() {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("text/x-component"));

        let mode = RequestTypeDetector::detect_render_mode(&headers);
        assert_eq!(mode, RenderMode::RscStream);
    }

    #[test]
    fn test_detect_rsc_stream_mode_with_multiple_types() {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("text/x-component, application/json"));

        let mode = RequestTypeDetector::detect_render_mode(&headers);
        assert_eq!(mode, RenderMode::RscStream);
    }

    #[test]
    fn test_detect_rsc_header() {
        let mut headers = HeaderMap::new();
        headers.insert("rsc", HeaderValue::from_static("1"));
        headers.insert("accept", HeaderValue::from_static("*/*"));
        assert_eq!(RequestTypeDetector::detect_render_mode(&headers), RenderMode::RscStream);

        let mut headers = HeaderMap::new();
        headers.insert("rsc", HeaderValue::from_static("0"));
        assert_eq!(RequestTypeDetector::detect_render_mode(&headers), RenderMode::Document);
    }

    #[test]
    fn test_default_to_document_when_no_accept_header() {
        let headers = HeaderMap::new();

        let mode = RequestTypeDetector::detect_render_mode(&headers);
        assert_eq!(mode, RenderMode::Document);
    }
}
