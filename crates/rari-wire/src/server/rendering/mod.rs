pub mod payload_injection;
pub mod streaming_response;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::{debug, error};

use crate::error::RscError;
use crate::rsc::rendering::{HtmlStreamOptions, render_html_stream};
use crate::rsc::streaming::{DecodeOptions, decode};

pub use payload_injection::{inject_rsc_payload, payload_script, tee_stream};
pub use streaming_response::{
    HTML_CONTENT_TYPE, RSC_CONTENT_TYPE, RscStreamResponse, StreamingHtmlResponse,
};

const DOCTYPE: &str = "<!DOCTYPE html>";

/// Renders a wire stream as a streaming HTML document that also carries the
/// rows inline, so the page can hydrate without a second request.
///
/// Resolves once the root row has been decoded. A failed decode completion
/// aborts the document stream after the markup rendered so far.
pub async fn render_document<S>(
    stream: S,
    options: DecodeOptions,
) -> Result<impl Stream<Item = Result<Bytes, RscError>> + Send, RscError>
where
    S: Stream<Item = Result<Bytes, RscError>> + Send + 'static,
{
    let nonce = options.config.inline_script_nonce.clone();
    let (tree_rows, payload_rows) = tee_stream(stream, options.config.stream_channel_capacity);

    let decoded = decode(tree_rows, options).await?;
    debug!("Document root decoded");

    let completion = decoded.completion.clone();
    let html = render_html_stream(decoded.value, HtmlStreamOptions { nonce: nonce.clone() });
    let body = inject_rsc_payload(html, payload_rows, nonce);

    Ok(async_stream::try_stream! {
        yield Bytes::from_static(DOCTYPE.as_bytes());

        let mut body = Box::pin(body);
        while let Some(chunk) = body.next().await {
            yield chunk?;
        }

        if let Err(e) = completion.await {
            error!("Document stream finished with a failed completion: {}", e);
            Err::<(), RscError>(e)?;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WireConfig;
    use crate::error::RenderError;
    use crate::rsc::types::{Element, Node};
    use crate::rsc::wire_format::serializer::{EncodeOptions, encode};

    fn page(body: Node) -> Node {
        Element::new("html")
            .with_child(Element::new("head").with_child(Element::new("title").with_child("Shop")))
            .with_child(Element::new("body").with_child(body))
            .into()
    }

    async fn collect(stream: impl Stream<Item = Result<Bytes, RscError>>) -> Vec<Result<String, RscError>> {
        stream
            .map(|chunk| chunk.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_document_streams_html_with_inline_rows() {
        let tree = page(Node::suspense(
            "Loading...",
            vec![Node::from_future(async {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                Ok(Node::from(Element::new("p").with_child("Ready")))
            })],
        ));

        let config = WireConfig { inline_script_nonce: Some("n0nce".to_string()), ..WireConfig::default() };
        let options = DecodeOptions { loader: None, config };

        let document = render_document(encode(tree, EncodeOptions::default()), options).await.unwrap();
        let chunks = collect(document).await;
        let html: String = chunks.into_iter().map(Result::unwrap).collect();

        assert!(html.starts_with("<!DOCTYPE html><html><head><title>Shop</title></head><body>"));
        assert!(html.ends_with("</body></html>"));
        assert!(html.contains("<p>Ready</p>"));
        assert!(html.contains("<script nonce=\"n0nce\">(self.__RSC_PAYLOAD||=[]).push("));

        let body_close = html.rfind("</body>").unwrap();
        assert!(html.rfind("__RSC_PAYLOAD").unwrap() < body_close);
        assert!(html.find("<p>Ready</p>").unwrap() < body_close);
    }

    #[tokio::test]
    async fn test_unrecovered_rejection_aborts_document() {
        let tree = page(Node::suspense(
            "Loading...",
            vec![Node::from_future(async {
                tokio::task::yield_now().await;
                Err(RenderError::new("Test error"))
            })],
        ));

        let document = render_document(encode(tree, EncodeOptions::default()), DecodeOptions::default())
            .await
            .unwrap();
        let chunks = collect(document).await;

        assert!(chunks.first().is_some_and(Result::is_ok));
        assert!(matches!(chunks.last(), Some(Err(RscError::UnrecoveredRejection(_)))));
    }

    /// Concatenates the rows carried by the inline payload scripts.
    fn inline_rows(html: &str) -> String {
        html.split("(self.__RSC_PAYLOAD||=[]).push(")
            .skip(1)
            .map(|part| {
                let literal = &part[..part.find(")</script>").unwrap()];
                serde_json::from_str::<String>(literal).unwrap()
            })
            .collect()
    }

    async fn encode_to_string(tree: Node) -> String {
        collect(encode(tree, EncodeOptions::default())).await.into_iter().map(Result::unwrap).collect()
    }

    #[tokio::test]
    async fn test_root_row_split_across_more_chunks_than_capacity() {
        let payload = "0:[\"$\",\"main\",null,{},[\"a long enough root row\"]]\n";
        let chunks: Vec<Result<Bytes, RscError>> =
            payload.as_bytes().chunks(4).map(|chunk| Ok(Bytes::copy_from_slice(chunk))).collect();
        assert!(chunks.len() > 2);

        let config = WireConfig { stream_channel_capacity: 2, ..WireConfig::default() };
        let options = DecodeOptions { loader: None, config };

        let document = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            render_document(futures::stream::iter(chunks), options),
        )
        .await
        .expect("root decode stalled")
        .unwrap();
        let html: String = collect(document).await.into_iter().map(Result::unwrap).collect();

        assert!(html.starts_with("<!DOCTYPE html><main>a long enough root row</main><script>"));
        assert!(html.ends_with("</script>"));
        assert_eq!(inline_rows(&html), payload);
    }

    #[tokio::test]
    async fn test_rows_arriving_before_shell_are_flushed_after_it() {
        fn tree() -> Node {
            page(Node::from_future(async {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                Ok(Node::text("late"))
            }))
        }
        let expected_rows = encode_to_string(tree()).await;

        let document = render_document(encode(tree(), EncodeOptions::default()), DecodeOptions::default())
            .await
            .unwrap();
        let html: String = collect(document).await.into_iter().map(Result::unwrap).collect();

        assert!(html.starts_with(
            "<!DOCTYPE html><html><head><title>Shop</title></head><body>late<script>(self.__RSC_PAYLOAD||=[]).push("
        ));
        assert!(html.ends_with("</script></body></html>"));
        assert_eq!(inline_rows(&html), expected_rows);
    }

    #[tokio::test]
    async fn test_malformed_root_fails_before_streaming() {
        let source = futures::stream::iter(vec![Ok(Bytes::from_static(b"0:{\"not\":\"a node\"}\n"))]);

        let result = render_document(source, DecodeOptions::default()).await;
        assert!(matches!(result, Err(RscError::Decoding(_))));
    }
}
