use bytes::Bytes;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, Stream, StreamExt};
use futures::future::BoxFuture;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use super::record::{AsyncPayload, ElementKind, MarkupPayload, WireNode, is_valid_tag};
use super::row::{ROOT_ROW_ID, Row};
use crate::error::{RenderError, RscError};
use crate::rsc::components::ClientManifest;
use crate::rsc::types::node::panic_to_render_error;
use crate::rsc::types::{
    Boundary, CallbackOutput, HtmlPhase, MarkupFuture, Node, NodeFuture, RawMarkup, Rendered,
};

pub type RscByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, RscError>> + Send>>;

#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    /// Stops scheduling and closes the stream once triggered.
    pub cancel: Option<CancellationToken>,
    /// When set, every client reference must be registered in it.
    pub manifest: Option<Arc<ClientManifest>>,
}

enum Settled {
    Node(Result<Node, RenderError>),
    Markup(Result<Option<String>, RenderError>),
}

type PendingBranch = BoxFuture<'static, (u32, Settled)>;

/// Turns a producer tree into rows. Synchronous parts are serialized in
/// place; every pending future becomes a slot with its own row.
pub struct RscSerializer {
    next_row_id: u32,
    pending: FuturesUnordered<PendingBranch>,
    manifest: Option<Arc<ClientManifest>>,
}

impl RscSerializer {
    pub fn new(manifest: Option<Arc<ClientManifest>>) -> Self {
        Self { next_row_id: ROOT_ROW_ID + 1, pending: FuturesUnordered::new(), manifest }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn serialize_root(&mut self, root: Node) -> Result<Row, RscError> {
        let wire = self.serialize_node(root)?;
        Ok(Row::model(ROOT_ROW_ID, wire.to_json()))
    }

    /// Waits for the next pending branch and serializes its row. Returns
    /// `None` when nothing is left in flight.
    pub async fn next_settled_row(&mut self) -> Option<Result<Row, RscError>> {
        let (row_id, settled) = self.pending.next().await?;
        Some(self.serialize_settled(row_id, settled))
    }

    fn serialize_settled(&mut self, row_id: u32, settled: Settled) -> Result<Row, RscError> {
        match settled {
            Settled::Node(Ok(node)) => {
                let wire = self.serialize_node(node)?;
                Ok(Row::model(row_id, wire.to_json()))
            }
            Settled::Markup(Ok(output)) => Ok(Row::model(
                row_id,
                output.map_or(serde_json::Value::Null, serde_json::Value::String),
            )),
            Settled::Node(Err(error)) | Settled::Markup(Err(error)) => {
                debug!("Row {} rejected: {}", row_id, error.message);
                Ok(Row::error(row_id, error))
            }
        }
    }

    pub fn serialize_node(&mut self, node: Node) -> Result<WireNode, RscError> {
        match node {
            Node::Empty => Ok(WireNode::Empty),
            Node::Text(text) => Ok(WireNode::Text(text)),
            Node::Element(element) => {
                if !is_valid_tag(&element.tag) {
                    return Err(RscError::encoding(format!(
                        "Invalid element tag '{}'",
                        element.tag
                    )));
                }
                Ok(WireNode::Element {
                    kind: ElementKind::Tag(element.tag),
                    key: element.key,
                    props: element.props,
                    children: self.serialize_children(element.children)?,
                    fallback: None,
                })
            }
            Node::Fragment(fragment) => Ok(WireNode::Element {
                kind: ElementKind::Fragment,
                key: fragment.key,
                props: serde_json::Map::new(),
                children: self.serialize_children(fragment.children)?,
                fallback: None,
            }),
            Node::Suspense(boundary) => self.serialize_boundary(ElementKind::Suspense, boundary),
            Node::ErrorBoundary(boundary) => {
                self.serialize_boundary(ElementKind::ErrorBoundary, boundary)
            }
            Node::ClientReference(client) => {
                if let Some(manifest) = &self.manifest
                    && !manifest.contains(&client.reference)
                {
                    return Err(RscError::encoding(format!(
                        "Client reference {} is not registered in the client manifest",
                        client.reference
                    )));
                }
                Ok(WireNode::ClientReference {
                    reference: client.reference,
                    key: client.key,
                    props: client.props,
                    children: self.serialize_children(client.children)?,
                })
            }
            Node::Component(component) => {
                let name = component.component.name().to_string();
                match component.invoke() {
                    Ok(Rendered::Ready(node)) => {
                        trace!("Component {} rendered synchronously", name);
                        let inline = self.serialize_node(node)?;
                        Ok(WireNode::Async(AsyncPayload::Inline(Box::new(inline))))
                    }
                    Ok(Rendered::Pending(future)) => {
                        Ok(WireNode::Async(AsyncPayload::Slot(self.schedule_node(future))))
                    }
                    Err(error) => {
                        debug!("Component {} failed: {}", name, error.message);
                        let rejected = async move { Err(error) }.boxed();
                        Ok(WireNode::Async(AsyncPayload::Slot(self.schedule_node(rejected))))
                    }
                }
            }
            Node::Async(async_node) => {
                Ok(WireNode::Async(AsyncPayload::Slot(self.schedule_node(async_node.into_future()))))
            }
            Node::Raw(markup) => Ok(self.serialize_raw(markup)),
        }
    }

    fn serialize_children(&mut self, children: Vec<Node>) -> Result<Vec<WireNode>, RscError> {
        children.into_iter().map(|child| self.serialize_node(child)).collect()
    }

    fn serialize_boundary(
        &mut self,
        kind: ElementKind,
        boundary: Boundary,
    ) -> Result<WireNode, RscError> {
        let fallback = self.serialize_node(*boundary.fallback)?;
        Ok(WireNode::Element {
            kind,
            key: boundary.key,
            props: serde_json::Map::new(),
            children: self.serialize_children(boundary.children)?,
            fallback: Some(Box::new(fallback)),
        })
    }

    fn serialize_raw(&mut self, markup: RawMarkup) -> WireNode {
        let outputs = markup
            .callbacks
            .iter()
            .map(|callback| {
                let output = std::panic::catch_unwind(AssertUnwindSafe(|| callback(HtmlPhase::Stream)))
                    .unwrap_or_else(|payload| {
                        let error = panic_to_render_error("markup callback", payload.as_ref());
                        CallbackOutput::pending(async move { Err(error) })
                    });
                match output {
                    CallbackOutput::None => MarkupPayload::Ready(None),
                    CallbackOutput::Ready(html) => MarkupPayload::Ready(Some(html)),
                    CallbackOutput::Pending(future) => MarkupPayload::Slot(self.schedule_markup(future)),
                }
            })
            .collect();

        WireNode::Raw { html: markup.html, outputs }
    }

    fn allocate_row_id(&mut self) -> u32 {
        let id = self.next_row_id;
        self.next_row_id += 1;
        id
    }

    fn schedule_node(&mut self, future: NodeFuture) -> u32 {
        let row_id = self.allocate_row_id();
        trace!("Scheduled async node in row {}", row_id);
        self.pending.push(
            AssertUnwindSafe(future)
                .catch_unwind()
                .map(move |result| {
                    let settled = result.unwrap_or_else(|payload| {
                        Err(panic_to_render_error("async node", payload.as_ref()))
                    });
                    (row_id, Settled::Node(settled))
                })
                .boxed(),
        );
        row_id
    }

    fn schedule_markup(&mut self, future: MarkupFuture) -> u32 {
        let row_id = self.allocate_row_id();
        self.pending.push(
            AssertUnwindSafe(future)
                .catch_unwind()
                .map(move |result| {
                    let settled = result.unwrap_or_else(|payload| {
                        Err(panic_to_render_error("markup callback", payload.as_ref()))
                    });
                    (row_id, Settled::Markup(settled))
                })
                .boxed(),
        );
        row_id
    }
}

/// Encodes `root` as a row stream. The root row is emitted first; slot rows
/// follow in settlement order. An encoding error is yielded once and ends
/// the stream.
pub fn encode(root: Node, options: EncodeOptions) -> RscByteStream {
    let EncodeOptions { cancel, manifest } = options;
    let cancel = cancel.unwrap_or_default();

    Box::pin(async_stream::stream! {
        if cancel.is_cancelled() {
            debug!("Encoding cancelled before the root row");
            return;
        }

        let mut serializer = RscSerializer::new(manifest);
        let mut rows_written = 0usize;

        match serializer.serialize_root(root).and_then(|row| row.to_line()) {
            Ok(line) => {
                rows_written += 1;
                yield Ok(Bytes::from(line));
            }
            Err(e) => {
                error!("Failed to encode root row: {}", e);
                yield Err(e);
                return;
            }
        }

        while serializer.has_pending() {
            let in_flight = serializer.pending_count();
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("Encoding cancelled with {} branches in flight", in_flight);
                    None
                }
                row = serializer.next_settled_row() => row,
            };

            let Some(row) = next else {
                break;
            };

            match row.and_then(|row| row.to_line()) {
                Ok(line) => {
                    rows_written += 1;
                    yield Ok(Bytes::from(line));
                }
                Err(e) => {
                    error!("Failed to encode row: {}", e);
                    yield Err(e);
                    return;
                }
            }
        }

        debug!("Encoded {} rows", rows_written);
    })
}
