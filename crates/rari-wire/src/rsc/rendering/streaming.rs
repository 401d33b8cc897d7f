use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, Stream, StreamExt};
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tracing::{debug, trace};

use super::html::{
    DeferredScope, Snapshotter, boundary_marker, error_boundary_marker, escape_attribute,
};
use crate::error::RscError;
use crate::rsc::streaming::SuspenseState;
use crate::rsc::types::{DecodedErrorBoundary, DecodedNode};

/// Swaps a streamed `<template data-rsc-target>` in for the content that
/// sits between `<template id>` and its closing comment.
const BOUNDARY_REPLACE_SCRIPT: &str = "window.__rscReplace=function(id){var t=document.querySelector('template[data-rsc-target=\"'+id+'\"]'),s=document.getElementById(id);if(!t||!s)return;var n=s.nextSibling;while(n&&!(n.nodeType===8&&n.data==='/'+id)){var x=n.nextSibling;n.remove();n=x}if(n)n.remove();s.replaceWith(t.content);t.remove()};";

#[derive(Debug, Clone, Default)]
pub struct HtmlStreamOptions {
    pub nonce: Option<String>,
}

fn script_open(nonce: Option<&str>) -> String {
    match nonce {
        Some(nonce) => format!("<script nonce=\"{}\">", escape_attribute(nonce)),
        None => "<script>".to_string(),
    }
}

fn replacement_chunk(marker: &str, html: &str, nonce: Option<&str>, define_script: bool) -> String {
    let mut chunk = format!("<template data-rsc-target=\"{marker}\">{html}</template>");
    chunk.push_str(&script_open(nonce));
    if define_script {
        chunk.push_str(BOUNDARY_REPLACE_SCRIPT);
    }
    chunk.push_str(&format!("window.__rscReplace(\"{marker}\")</script>"));
    chunk
}

/// Renders `children` once nothing outside pending Suspense scopes is still
/// waiting, returning the markup and the scopes left behind markers.
async fn render_marked(
    children: &[DecodedNode],
    enclosing: &[Arc<DecodedErrorBoundary>],
) -> Result<(String, Vec<DeferredScope>), RscError> {
    loop {
        let mut snapshotter = Snapshotter::new(true).with_enclosing(enclosing.to_vec());
        let mut html = String::new();
        match snapshotter.write_all(children, &mut html)? {
            None => return Ok((html, snapshotter.take_deferred())),
            Some(wait) => wait.await,
        }
    }
}

fn wait_for_scope(scope: DeferredScope) -> BoxFuture<'static, (DeferredScope, SuspenseState)> {
    async move {
        let state = scope.suspense.scope.settled().await;
        (scope, state)
    }
    .boxed()
}

/// Streams HTML for a decoded tree: first a shell with fallbacks in place of
/// pending Suspense scopes, then one replacement chunk per scope as it
/// resolves. When a rejection abandons a scope, the ErrorBoundary that
/// captured it is replaced with its fallback; with no such boundary the
/// Suspense fallback stays.
pub fn render_html_stream(
    root: DecodedNode,
    options: HtmlStreamOptions,
) -> impl Stream<Item = Result<String, RscError>> + Send {
    async_stream::try_stream! {
        let (shell, deferred) = render_marked(std::slice::from_ref(&root), &[]).await?;
        debug!("Shell rendered with {} pending boundaries", deferred.len());
        yield shell;

        let mut waiting: FuturesUnordered<_> = deferred.into_iter().map(wait_for_scope).collect();
        let mut replaced_boundaries = FxHashSet::default();
        let mut script_defined = false;

        while let Some((scope, state)) = waiting.next().await {
            let suspense_id = scope.suspense.scope.id();
            if scope.enclosing.iter().any(|boundary| replaced_boundaries.contains(&boundary.scope.id())) {
                trace!("Boundary {} sits inside a replaced error boundary", suspense_id);
                continue;
            }

            let (marker, html, nested) = if state == SuspenseState::Resolved {
                let (html, nested) = render_marked(&scope.suspense.children, &scope.enclosing).await?;
                (boundary_marker(suspense_id), html, nested)
            } else {
                let Some(position) =
                    scope.enclosing.iter().rposition(|boundary| boundary.scope.has_failed())
                else {
                    debug!("Boundary {} settled as {:?}; keeping fallback", suspense_id, state);
                    continue;
                };

                let boundary = &scope.enclosing[position];
                debug!(
                    "Boundary {} abandoned; error boundary {} falls back",
                    suspense_id,
                    boundary.scope.id()
                );
                replaced_boundaries.insert(boundary.scope.id());
                let (html, nested) = render_marked(
                    std::slice::from_ref(&boundary.fallback),
                    &scope.enclosing[..position],
                )
                .await?;
                (error_boundary_marker(boundary.scope.id()), html, nested)
            };

            waiting.extend(nested.into_iter().map(wait_for_scope));
            yield replacement_chunk(&marker, &html, options.nonce.as_deref(), !script_defined);
            script_defined = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::rsc::rendering::render_eager;
    use crate::rsc::streaming::{DecodeOptions, decode};
    use crate::rsc::types::{Element, Node};
    use crate::rsc::wire_format::serializer::{EncodeOptions, encode};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_shell_then_replacement() {
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let tree: Node = Element::new("main")
            .with_child(Node::suspense(
                Element::new("p").with_child("Loading..."),
                vec![Node::from_future(async move {
                    let _ = release_rx.await;
                    Ok(Node::from(Element::new("p").with_child("Ready")))
                })],
            ))
            .into();

        let decoded = decode(encode(tree, EncodeOptions::default()), DecodeOptions::default())
            .await
            .unwrap();
        let mut html = Box::pin(render_html_stream(
            decoded.value.clone(),
            HtmlStreamOptions { nonce: Some("abc".to_string()) },
        ));

        let shell = html.next().await.unwrap().unwrap();
        assert_eq!(shell, "<main><template id=\"S:0\"></template><p>Loading...</p><!--/S:0--></main>");

        release_tx.send(()).unwrap();
        let replacement = html.next().await.unwrap().unwrap();
        assert!(replacement.starts_with("<template data-rsc-target=\"S:0\"><p>Ready</p></template>"));
        assert!(replacement.contains("<script nonce=\"abc\">window.__rscReplace=function"));
        assert!(replacement.ends_with("window.__rscReplace(\"S:0\")</script>"));

        assert!(html.next().await.is_none());
        decoded.completion.await.unwrap();
    }

    #[tokio::test]
    async fn test_resolved_tree_streams_single_chunk() {
        let tree = Node::suspense("Loading...", vec![Node::from_future(async { Ok(Node::text("done")) })]);
        let decoded = decode(encode(tree, EncodeOptions::default()), DecodeOptions::default())
            .await
            .unwrap();
        decoded.completion.clone().await.unwrap();

        let chunks: Vec<_> =
            render_html_stream(decoded.value, HtmlStreamOptions::default()).collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_deref().unwrap(), "done");
    }

    #[tokio::test]
    async fn test_failed_error_boundary_replaces_its_region() {
        let (reject_tx, reject_rx) = oneshot::channel::<()>();
        let tree = Node::error_boundary(
            "failed",
            vec![Node::suspense(
                "Loading...",
                vec![Node::from_future(async move {
                    let _ = reject_rx.await;
                    Err(RenderError::new("Test error"))
                })],
            )],
        );
        let decoded = decode(encode(tree, EncodeOptions::default()), DecodeOptions::default())
            .await
            .unwrap();
        let mut html = Box::pin(render_html_stream(decoded.value.clone(), HtmlStreamOptions::default()));

        let shell = html.next().await.unwrap().unwrap();
        assert_eq!(
            shell,
            "<template id=\"E:0\"></template><template id=\"S:0\"></template>Loading...<!--/S:0--><!--/E:0-->"
        );

        reject_tx.send(()).unwrap();
        let replacement = html.next().await.unwrap().unwrap();
        assert!(replacement.starts_with("<template data-rsc-target=\"E:0\">failed</template><script>"));
        assert!(replacement.ends_with("window.__rscReplace(\"E:0\")</script>"));

        assert!(html.next().await.is_none());
        decoded.completion.await.unwrap();
    }

    #[tokio::test]
    async fn test_streamed_and_eager_renders_agree_on_failure() {
        let tree = Node::error_boundary(
            "failed",
            vec![Node::suspense(
                "Loading...",
                vec![Node::from_future(async {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    Err(RenderError::new("Test error"))
                })],
            )],
        );
        let decoded = decode(encode(tree, EncodeOptions::default()), DecodeOptions::default())
            .await
            .unwrap();

        let chunks: Vec<String> = render_html_stream(decoded.value.clone(), HtmlStreamOptions::default())
            .map(Result::unwrap)
            .collect()
            .await;
        let eager = render_eager(&decoded.value).await.unwrap();

        assert_eq!(eager, "failed");
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].contains("Loading..."));
        assert!(chunks[1].starts_with("<template data-rsc-target=\"E:0\">failed</template>"));
        decoded.completion.await.unwrap();
    }

    #[tokio::test]
    async fn test_already_failed_boundary_renders_fallback_in_shell() {
        let tree = Node::error_boundary(
            "failed",
            vec![Node::suspense(
                "Loading...",
                vec![Node::from_future(async { Err(RenderError::new("Test error")) })],
            )],
        );
        let decoded = decode(encode(tree, EncodeOptions::default()), DecodeOptions::default())
            .await
            .unwrap();
        decoded.completion.clone().await.unwrap();

        let chunks: Vec<_> =
            render_html_stream(decoded.value, HtmlStreamOptions::default()).collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_deref().unwrap(), "failed");
    }

    #[tokio::test]
    async fn test_unrecovered_rejection_keeps_suspense_fallback() {
        let (reject_tx, reject_rx) = oneshot::channel::<()>();
        let tree: Node = Element::new("main")
            .with_child(Node::suspense(
                "Loading...",
                vec![Node::from_future(async move {
                    let _ = reject_rx.await;
                    Err(RenderError::new("Test error"))
                })],
            ))
            .into();
        let decoded = decode(encode(tree, EncodeOptions::default()), DecodeOptions::default())
            .await
            .unwrap();
        let mut html = Box::pin(render_html_stream(decoded.value.clone(), HtmlStreamOptions::default()));

        let shell = html.next().await.unwrap().unwrap();
        assert_eq!(shell, "<main><template id=\"S:0\"></template>Loading...<!--/S:0--></main>");

        reject_tx.send(()).unwrap();
        assert!(html.next().await.is_none());
        assert!(matches!(decoded.completion.await, Err(RscError::UnrecoveredRejection(_))));
    }
}
