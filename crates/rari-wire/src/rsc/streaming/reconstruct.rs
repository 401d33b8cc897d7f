use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, error, trace};

use super::boundary_manager::{BoundaryRuntime, RejectionOutcome, ScopeContext};
use super::slot::{AsyncSlot, SlotKey, SlotWriter, slot_channel};
use crate::error::RscError;
use crate::rsc::components::ClientReferenceRegistry;
use crate::rsc::types::{
    DecodedElement, DecodedErrorBoundary, DecodedFragment, DecodedNode, DecodedRaw,
    DecodedSuspense, DeferredMarkup, ResolvedComponent,
};
use crate::rsc::wire_format::record::{AsyncPayload, ElementKind, MarkupPayload, WireNode};
use crate::rsc::wire_format::row::{ROOT_ROW_ID, Row, RowPayload};

enum SlotSender {
    Node(SlotWriter<DecodedNode>),
    Markup(SlotWriter<Option<String>>),
}

impl SlotSender {
    fn reject(self, error: RscError) {
        match self {
            Self::Node(writer) => writer.reject(error),
            Self::Markup(writer) => writer.reject(error),
        }
    }
}

struct PendingSlot {
    sender: SlotSender,
    ctx: ScopeContext,
}

pub(crate) struct LoadOutcome {
    writer: SlotWriter<DecodedNode>,
    ctx: ScopeContext,
    result: Result<DecodedNode, RscError>,
}

/// Rebuilds the consumer tree from rows and settles slots as their rows
/// arrive. Rows may arrive before the row that references them.
pub(crate) struct Reconstructor {
    runtime: Arc<BoundaryRuntime>,
    registry: Option<ClientReferenceRegistry>,
    slots: FxHashMap<u32, PendingSlot>,
    early_rows: FxHashMap<u32, RowPayload>,
    settled_rows: FxHashSet<u32>,
    loads: FuturesUnordered<BoxFuture<'static, LoadOutcome>>,
    next_reference_id: u32,
    log_rows: bool,
}

impl Reconstructor {
    pub(crate) fn new(
        runtime: Arc<BoundaryRuntime>,
        registry: Option<ClientReferenceRegistry>,
        log_rows: bool,
    ) -> Self {
        Self {
            runtime,
            registry,
            slots: FxHashMap::default(),
            early_rows: FxHashMap::default(),
            settled_rows: FxHashSet::default(),
            loads: FuturesUnordered::new(),
            next_reference_id: 0,
            log_rows,
        }
    }

    pub(crate) fn reconstruct_root(&mut self, row: Row) -> Result<DecodedNode, RscError> {
        if row.id != ROOT_ROW_ID {
            return Err(RscError::decoding(format!(
                "Expected root row {} first, got row {}",
                ROOT_ROW_ID, row.id
            )));
        }

        match row.payload {
            RowPayload::Model(value) => {
                if self.log_rows {
                    debug!("Root row: {}", value);
                }
                self.reconstruct(WireNode::from_json(&value)?, ScopeContext::default())
            }
            RowPayload::Error(error) => Err(RscError::decoding(format!(
                "Root row cannot be a rejection: {}",
                error.message
            ))),
        }
    }

    pub(crate) fn apply_row(&mut self, row: Row) -> Result<(), RscError> {
        if self.log_rows {
            debug!("Row {}: {:?}", row.id, row.payload);
        }

        if row.id == ROOT_ROW_ID {
            return Err(RscError::decoding("Duplicate root row".to_string()));
        }

        if let Some(pending) = self.slots.remove(&row.id) {
            return self.settle(row.id, pending, row.payload);
        }

        if self.settled_rows.contains(&row.id) || self.early_rows.contains_key(&row.id) {
            return Err(RscError::decoding(format!("Duplicate row {}", row.id)));
        }

        trace!("Buffering row {} until it is referenced", row.id);
        self.early_rows.insert(row.id, row.payload);
        Ok(())
    }

    pub(crate) fn has_loads(&self) -> bool {
        !self.loads.is_empty()
    }

    pub(crate) async fn next_load(&mut self) -> Option<LoadOutcome> {
        self.loads.next().await
    }

    pub(crate) fn apply_load(&self, outcome: LoadOutcome) {
        let LoadOutcome { writer, ctx, result } = outcome;
        match result {
            Ok(node) => {
                trace!("Resolved {}", writer.key());
                writer.fulfil(node);
                self.runtime.fulfil(ctx);
            }
            Err(error) => {
                let label = writer.key().to_string();
                writer.reject(error.clone());
                self.record_rejection(&label, ctx, &error);
            }
        }
    }

    fn record_rejection(&self, slot: &str, ctx: ScopeContext, error: &RscError) {
        match self.runtime.reject(ctx, error) {
            RejectionOutcome::Captured(boundary) => {
                debug!("{} rejected, captured by error boundary {}: {}", slot, boundary, error);
            }
            RejectionOutcome::Unrecovered => {
                error!("{} rejected outside any error boundary: {}", slot, error);
            }
        }
    }

    pub(crate) fn pending_slot_count(&self) -> usize {
        self.slots.len() + self.loads.len()
    }

    /// Fails every outstanding slot with `error`. No further rows are read.
    pub(crate) fn abort(&mut self, error: &RscError) {
        debug!("Aborting decode with {} unsettled slots: {}", self.pending_slot_count(), error);
        for (_, pending) in self.slots.drain() {
            pending.sender.reject(error.clone());
        }
        self.early_rows.clear();
        self.loads.clear();
        self.runtime.abandon_pending();
    }

    /// Called once the stream has ended and all loads have finished.
    pub(crate) fn finish(&mut self) -> Result<(), RscError> {
        if !self.slots.is_empty() {
            let mut missing: Vec<u32> = self.slots.keys().copied().collect();
            missing.sort_unstable();
            let error = RscError::decoding(format!(
                "Stream closed before rows {missing:?} arrived"
            ));
            self.abort(&error);
            return Err(error);
        }

        if !self.early_rows.is_empty() {
            let mut orphans: Vec<u32> = self.early_rows.keys().copied().collect();
            orphans.sort_unstable();
            let error =
                RscError::decoding(format!("Rows {orphans:?} are not referenced by any slot"));
            self.abort(&error);
            return Err(error);
        }

        match self.runtime.unrecovered() {
            Some(error) => Err(error.unrecovered()),
            None => Ok(()),
        }
    }

    fn settle(&mut self, id: u32, pending: PendingSlot, payload: RowPayload) -> Result<(), RscError> {
        self.settled_rows.insert(id);
        let PendingSlot { sender, ctx } = pending;

        match (sender, payload) {
            (SlotSender::Node(writer), RowPayload::Model(value)) => {
                let node = self.reconstruct(WireNode::from_json(&value)?, ctx)?;
                writer.fulfil(node);
                self.runtime.fulfil(ctx);
            }
            (SlotSender::Markup(writer), RowPayload::Model(value)) => {
                let output = match value {
                    JsonValue::Null => None,
                    JsonValue::String(html) => Some(html),
                    other => {
                        return Err(RscError::decoding(format!(
                            "Row {id} should hold markup, got {other}"
                        )));
                    }
                };
                writer.fulfil(output);
                self.runtime.fulfil(ctx);
            }
            (sender, RowPayload::Error(error)) => {
                let error = RscError::Rejected(error);
                sender.reject(error.clone());
                self.record_rejection(&format!("row {id}"), ctx, &error);
            }
        }

        Ok(())
    }

    fn reconstruct(&mut self, node: WireNode, ctx: ScopeContext) -> Result<DecodedNode, RscError> {
        match node {
            WireNode::Empty => Ok(DecodedNode::Empty),
            WireNode::Text(text) => Ok(DecodedNode::Text(text)),
            WireNode::List(items) => Ok(DecodedNode::Fragment(Arc::new(DecodedFragment {
                key: None,
                children: self.reconstruct_all(items, ctx)?,
            }))),
            WireNode::Element { kind, key, props, children, fallback } => match kind {
                ElementKind::Tag(tag) => Ok(DecodedNode::Element(Arc::new(DecodedElement {
                    tag,
                    key,
                    props,
                    children: self.reconstruct_all(children, ctx)?,
                }))),
                ElementKind::Fragment => Ok(DecodedNode::Fragment(Arc::new(DecodedFragment {
                    key,
                    children: self.reconstruct_all(children, ctx)?,
                }))),
                ElementKind::Suspense => {
                    let fallback = self.reconstruct_fallback(fallback, ctx)?;
                    let (inner, scope) = self.runtime.open_suspense(ctx);
                    let children = self.reconstruct_all(children, inner)?;
                    self.runtime.seal_suspense(scope.id());
                    Ok(DecodedNode::Suspense(Arc::new(DecodedSuspense {
                        key,
                        fallback,
                        children,
                        scope,
                    })))
                }
                ElementKind::ErrorBoundary => {
                    let fallback = self.reconstruct_fallback(fallback, ctx)?;
                    let (inner, scope) = self.runtime.open_error_boundary(ctx);
                    let children = self.reconstruct_all(children, inner)?;
                    Ok(DecodedNode::ErrorBoundary(Arc::new(DecodedErrorBoundary {
                        key,
                        fallback,
                        children,
                        scope,
                    })))
                }
            },
            WireNode::Async(AsyncPayload::Inline(inner)) => self.reconstruct(*inner, ctx),
            WireNode::Async(AsyncPayload::Slot(id)) => {
                let (writer, slot) = slot_channel(SlotKey::Row(id));
                self.register_slot(id, PendingSlot { sender: SlotSender::Node(writer), ctx })?;
                Ok(DecodedNode::Async(slot))
            }
            WireNode::ClientReference { reference, key, props, children } => {
                let children = self.reconstruct_all(children, ctx)?;
                let key_id = self.next_reference_id;
                self.next_reference_id += 1;
                let (writer, slot) = slot_channel(SlotKey::ClientReference(key_id));
                self.runtime.track(ctx);

                match &self.registry {
                    Some(registry) => {
                        let resolve = registry.resolve(&reference.id, &reference.export_name);
                        self.loads.push(
                            async move {
                                let result = resolve.await.map(|component| {
                                    DecodedNode::Component(Arc::new(ResolvedComponent {
                                        reference,
                                        component,
                                        key,
                                        props,
                                        children,
                                    }))
                                });
                                LoadOutcome { writer, ctx, result }
                            }
                            .boxed(),
                        );
                    }
                    None => {
                        let error = RscError::module_load(format!(
                            "A client module loader is required to decode client reference {reference}"
                        ));
                        let label = writer.key().to_string();
                        writer.reject(error.clone());
                        self.record_rejection(&label, ctx, &error);
                    }
                }

                Ok(DecodedNode::Async(slot))
            }
            WireNode::Raw { html, outputs } => {
                let deferred = outputs
                    .into_iter()
                    .map(|output| match output {
                        MarkupPayload::Ready(html) => Ok(DeferredMarkup::Ready(html)),
                        MarkupPayload::Slot(id) => {
                            let (writer, slot): (_, AsyncSlot<Option<String>>) =
                                slot_channel(SlotKey::Row(id));
                            self.register_slot(id, PendingSlot {
                                sender: SlotSender::Markup(writer),
                                ctx,
                            })?;
                            Ok(DeferredMarkup::Slot(slot))
                        }
                    })
                    .collect::<Result<Vec<_>, RscError>>()?;

                Ok(DecodedNode::Raw(Arc::new(DecodedRaw { html, deferred })))
            }
        }
    }

    fn reconstruct_all(
        &mut self,
        nodes: Vec<WireNode>,
        ctx: ScopeContext,
    ) -> Result<Vec<DecodedNode>, RscError> {
        nodes.into_iter().map(|node| self.reconstruct(node, ctx)).collect()
    }

    fn reconstruct_fallback(
        &mut self,
        fallback: Option<Box<WireNode>>,
        ctx: ScopeContext,
    ) -> Result<DecodedNode, RscError> {
        match fallback {
            Some(fallback) => self.reconstruct(*fallback, ctx),
            None => Ok(DecodedNode::Empty),
        }
    }

    fn register_slot(&mut self, id: u32, pending: PendingSlot) -> Result<(), RscError> {
        if id == ROOT_ROW_ID || self.slots.contains_key(&id) || self.settled_rows.contains(&id) {
            return Err(RscError::decoding(format!("Row {id} is referenced more than once")));
        }

        self.runtime.track(pending.ctx);

        match self.early_rows.remove(&id) {
            Some(payload) => self.settle(id, pending, payload),
            None => {
                self.slots.insert(id, pending);
                Ok(())
            }
        }
    }
}
