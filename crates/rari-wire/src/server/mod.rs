pub mod rendering;
pub mod request_type;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

use crate::error::RscError;
use crate::rsc::streaming::DecodeOptions;
use crate::rsc::types::Node;
use crate::rsc::wire_format::serializer::{EncodeOptions, encode};

pub use rendering::{RscStreamResponse, StreamingHtmlResponse, render_document};
pub use request_type::{RenderMode, RequestTypeDetector};

/// Plain-text 500. Development builds include the error detail.
fn internal_error(error: &RscError, development: bool) -> Response {
    let body = if development {
        format!("Internal Server Error\n\n[{}] {}", error.code(), error)
    } else {
        "Internal Server Error".to_string()
    };
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// Serves `tree` in the representation the request asks for: raw wire rows
/// for client navigations, a streaming HTML document otherwise.
pub async fn render_response(
    headers: &HeaderMap,
    tree: Node,
    encode_options: EncodeOptions,
    decode_options: DecodeOptions,
) -> Response {
    let mode = RequestTypeDetector::detect_render_mode(headers);
    let rows = encode(tree, encode_options);

    match mode {
        RenderMode::RscStream => {
            debug!("Streaming RSC wire format");
            RscStreamResponse::new(rows).into_response()
        }
        RenderMode::Document => {
            debug!("Streaming HTML document");
            let development = decode_options.config.is_development();
            match render_document(rows, decode_options).await {
                Ok(document) => StreamingHtmlResponse::new(document).into_response(),
                Err(e) => {
                    error!("Failed to render document [{}]: {}", e.code(), e);
                    internal_error(&e, development)
                }
            }
        }
    }
}
