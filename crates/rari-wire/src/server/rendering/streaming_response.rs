use axum::body::Body;
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use tracing::warn;

use crate::error::RscError;

pub const RSC_CONTENT_TYPE: &str = "text/x-component; charset=utf-8";
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, RscError>> + Send>>;

fn streaming_body(stream: ByteStream, content_type: &'static str) -> Response {
    let body = stream.map(|chunk| {
        chunk.map_err(|e| {
            warn!("Aborting response stream: {}", e);
            std::io::Error::other(e.to_string())
        })
    });

    let mut response = Response::new(Body::from_stream(body));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// Raw wire rows for clients that decode the stream themselves.
pub struct RscStreamResponse {
    stream: ByteStream,
}

impl RscStreamResponse {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, RscError>> + Send + 'static,
    {
        Self { stream: Box::pin(stream) }
    }
}

impl IntoResponse for RscStreamResponse {
    fn into_response(self) -> Response {
        streaming_body(self.stream, RSC_CONTENT_TYPE)
    }
}

pub struct StreamingHtmlResponse {
    stream: ByteStream,
}

impl StreamingHtmlResponse {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, RscError>> + Send + 'static,
    {
        Self { stream: Box::pin(stream) }
    }
}

impl IntoResponse for StreamingHtmlResponse {
    fn into_response(self) -> Response {
        streaming_body(self.stream, HTML_CONTENT_TYPE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_stream::stream;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_streaming_html_response_basic() {
        let html_stream = stream! {
            yield Ok(Bytes::from_static(b"<!DOCTYPE html>"));
            yield Ok(Bytes::from_static(b"<html><body>"));
            yield Ok(Bytes::from_static(b"<h1>Hello</h1>"));
            yield Ok(Bytes::from_static(b"</body></html>"));
        };

        let response = StreamingHtmlResponse::new(html_stream).into_response();

        assert_eq!(response.status(), 200);
        assert_eq!(response.headers().get("content-type").unwrap(), HTML_CONTENT_TYPE);
        assert_eq!(response.headers().get("transfer-encoding").unwrap(), "chunked");
        assert_eq!(response.headers().get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(response.headers().get("x-accel-buffering").unwrap(), "no");
        assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body_str = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(body_str, "<!DOCTYPE html><html><body><h1>Hello</h1></body></html>");
    }

    #[tokio::test]
    async fn test_rsc_stream_response() {
        let rows = stream! {
            yield Ok(Bytes::from_static(b"0:[\"$A\",\"$@1\"]\n"));
            yield Ok(Bytes::from_static(b"1:\"done\"\n"));
        };

        let response = RscStreamResponse::new(rows).into_response();

        assert_eq!(response.status(), 200);
        assert_eq!(response.headers().get("content-type").unwrap(), RSC_CONTENT_TYPE);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body_bytes[..], b"0:[\"$A\",\"$@1\"]\n1:\"done\"\n");
    }

    #[tokio::test]
    async fn test_stream_error_aborts_body() {
        let html_stream = stream! {
            yield Ok(Bytes::from_static(b"<!DOCTYPE html>"));
            yield Err(RscError::transport("connection reset"));
        };

        let response = StreamingHtmlResponse::new(html_stream).into_response();

        assert_eq!(response.status(), 200);
        assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());
    }

    #[tokio::test]
    async fn test_streaming_response_empty() {
        let html_stream = stream! {
            if false {
                yield Ok::<Bytes, RscError>(Bytes::new());
            }
        };

        let response = StreamingHtmlResponse::new(html_stream).into_response();

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body_bytes.len(), 0);
    }
}
