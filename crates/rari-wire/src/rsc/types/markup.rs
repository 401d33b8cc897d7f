use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

use crate::error::{RenderError, RscError};
use crate::rsc::streaming::slot::{AsyncSlot, SlotRead};

/// Point in a host render at which a raw markup callback is asked for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HtmlPhase {
    Stringify,
    BeforeStream,
    Stream,
}

pub type MarkupFuture = BoxFuture<'static, Result<Option<String>, RenderError>>;

pub enum CallbackOutput {
    None,
    Ready(String),
    Pending(MarkupFuture),
}

impl CallbackOutput {
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<Option<String>, RenderError>> + Send + 'static,
    {
        Self::Pending(future.boxed())
    }
}

pub type MarkupCallback = Arc<dyn Fn(HtmlPhase) -> CallbackOutput + Send + Sync>;

/// Pre-rendered markup plus host-side finalization hooks.
#[derive(Clone)]
pub struct RawMarkup {
    pub html: String,
    pub callbacks: Vec<MarkupCallback>,
}

impl RawMarkup {
    pub fn new(html: impl Into<String>) -> Self {
        Self { html: html.into(), callbacks: Vec::new() }
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(HtmlPhase) -> CallbackOutput + Send + Sync + 'static,
    {
        self.callbacks.push(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for RawMarkup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawMarkup")
            .field("html", &self.html)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// Callback output as seen by the consumer: either already present in the
/// payload or arriving later in its own row.
#[derive(Debug, Clone)]
pub enum DeferredMarkup {
    Ready(Option<String>),
    Slot(AsyncSlot<Option<String>>),
}

impl DeferredMarkup {
    /// Re-exposes the output through the producer-side callback shape. The
    /// value was captured at stream phase, so every phase sees the same output.
    pub fn invoke(&self, _phase: HtmlPhase) -> CallbackOutput {
        match self {
            Self::Ready(Some(html)) => CallbackOutput::Ready(html.clone()),
            Self::Ready(None) => CallbackOutput::None,
            Self::Slot(slot) => match slot.read() {
                SlotRead::Ready(Some(html)) => CallbackOutput::Ready(html),
                SlotRead::Ready(None) => CallbackOutput::None,
                SlotRead::Rejected(error) => {
                    CallbackOutput::pending(async move { Err(error.render_error()) })
                }
                SlotRead::Pending(_) => {
                    let slot = slot.clone();
                    CallbackOutput::pending(async move {
                        slot.settled().await.map_err(|error: RscError| error.render_error())
                    })
                }
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecodedRaw {
    pub html: String,
    pub deferred: Vec<DeferredMarkup>,
}

impl DecodedRaw {
    pub fn callbacks(&self) -> Vec<MarkupCallback> {
        self.deferred
            .iter()
            .cloned()
            .map(|deferred| {
                let callback: MarkupCallback = Arc::new(move |phase| deferred.invoke(phase));
                callback
            })
            .collect()
    }

    /// Re-wraps the decoded markup so it can be handed to another producer.
    pub fn to_markup(&self) -> RawMarkup {
        RawMarkup { html: self.html.clone(), callbacks: self.callbacks() }
    }
}
