use cow_utils::CowUtils;
use futures::future::BoxFuture;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::RscError;
use crate::rsc::streaming::{SlotRead, SlotWait, SuspenseState};
use crate::rsc::types::{
    CallbackOutput, DecodedErrorBoundary, DecodedNode, DecodedSuspense, DeferredMarkup, HtmlPhase,
    Node, Props, RawMarkup, Rendered,
};


const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

pub fn escape_html(text: &str) -> String {
    text.cow_replace('&', "&amp;")
        .cow_replace('<', "&lt;")
        .cow_replace('>', "&gt;")
        .cow_replace('"', "&quot;")
        .cow_replace('\'', "&#39;")
        .into_owned()
}

pub fn escape_attribute(text: &str) -> String {
    text.cow_replace('&', "&amp;")
        .cow_replace('"', "&quot;")
        .cow_replace('<', "&lt;")
        .cow_replace('>', "&gt;")
        .into_owned()
}

fn serialize_style_object(style_obj: &Props) -> String {
    let style_parts: Vec<String> = style_obj
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let kebab_key = k.chars().fold(String::new(), |mut acc, c| {
                if c.is_uppercase() {
                    acc.push('-');
                    acc.extend(c.to_lowercase());
                } else {
                    acc.push(c);
                }
                acc
            });
            let value_str = match v {
                JsonValue::String(s) => s.clone(),
                JsonValue::Number(n) => match n.as_f64() {
                    Some(f) if n.is_f64() && f.is_finite() => {
                        format!("{:.10}", f).trim_end_matches('0').trim_end_matches('.').to_string()
                    }
                    _ => n.to_string(),
                },
                other => other.to_string(),
            };
            format!("{}:{}", kebab_key, value_str)
        })
        .collect();
    style_parts.join(";")
}

pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

pub fn render_open_tag(tag: &str, props: &Props) -> String {
    let mut html = format!("<{}", tag);

    for (key, value) in props {
        if matches!(key.as_str(), "children" | "key" | "ref") || value.is_null() {
            continue;
        }

        let attr_name = match key.as_str() {
            "className" => "class",
            "htmlFor" => "for",
            _ => key.as_str(),
        };

        match value {
            JsonValue::Object(style_obj) if key == "style" => {
                let style_str = serialize_style_object(style_obj);
                html.push_str(&format!(" style=\"{}\"", escape_attribute(&style_str)));
            }
            JsonValue::Bool(true) => html.push_str(&format!(" {}", attr_name)),
            JsonValue::String(s) => {
                html.push_str(&format!(" {}=\"{}\"", attr_name, escape_attribute(s)));
            }
            JsonValue::Number(n) => {
                html.push_str(&format!(" {}=\"{}\"", attr_name, escape_attribute(&n.to_string())));
            }
            _ => {}
        }
    }

    html.push('>');
    html
}

pub fn render_close_tag(tag: &str) -> String {
    if is_void_element(tag) { String::new() } else { format!("</{}>", tag) }
}

/// Renders a producer tree without going through the wire. Only trees that
/// can be rendered synchronously are accepted.
pub fn render_static(node: Node) -> Result<String, RscError> {
    let mut html = String::new();
    write_static(node, &mut html)?;
    Ok(html)
}

fn write_static(node: Node, out: &mut String) -> Result<(), RscError> {
    match node {
        Node::Empty => {}
        Node::Text(text) => out.push_str(&escape_html(&text)),
        Node::Element(element) => {
            out.push_str(&render_open_tag(&element.tag, &element.props));
            if !is_void_element(&element.tag) {
                for child in element.children {
                    write_static(child, out)?;
                }
            }
            out.push_str(&render_close_tag(&element.tag));
        }
        Node::Fragment(fragment) => {
            for child in fragment.children {
                write_static(child, out)?;
            }
        }
        Node::Suspense(boundary) => {
            for child in boundary.children {
                write_static(child, out)?;
            }
        }
        Node::ErrorBoundary(boundary) => {
            let mut inner = String::new();
            let result: Result<(), RscError> =
                boundary.children.into_iter().try_for_each(|child| write_static(child, &mut inner));
            match result {
                Ok(()) => out.push_str(&inner),
                Err(e) if !e.is_fatal() => {
                    debug!("Error boundary rendering fallback: {}", e);
                    write_static(*boundary.fallback, out)?;
                }
                Err(e) => return Err(e),
            }
        }
        Node::Component(component) => {
            let name = component.component.name().to_string();
            match component.invoke()? {
                Rendered::Ready(node) => write_static(node, out)?,
                Rendered::Pending(_) => {
                    return Err(RscError::encoding(format!(
                        "Component {name} suspended during a static render"
                    )));
                }
            }
        }
        Node::ClientReference(client) => {
            return Err(RscError::encoding(format!(
                "Client reference {} cannot be rendered statically",
                client.reference
            )));
        }
        Node::Async(_) => {
            return Err(RscError::encoding(
                "Async node cannot be rendered statically".to_string(),
            ));
        }
        Node::Raw(markup) => write_static_raw(&markup, out),
    }

    Ok(())
}

fn write_static_raw(markup: &RawMarkup, out: &mut String) {
    out.push_str(&markup.html);
    for callback in &markup.callbacks {
        if let CallbackOutput::Ready(html) = callback(HtmlPhase::Stringify) {
            out.push_str(&html);
        }
    }
}

/// Renders a decoded tree, waiting for every slot. ErrorBoundaries swap in
/// their fallback when their contents fail.
pub async fn render_eager(node: &DecodedNode) -> Result<String, RscError> {
    let mut html = String::new();
    write_eager(node, &mut html).await?;
    Ok(html)
}

fn write_eager<'a>(
    node: &'a DecodedNode,
    out: &'a mut String,
) -> BoxFuture<'a, Result<(), RscError>> {
    Box::pin(async move {
        match node {
            DecodedNode::Empty => {}
            DecodedNode::Text(text) => out.push_str(&escape_html(text)),
            DecodedNode::Element(element) => {
                out.push_str(&render_open_tag(&element.tag, &element.props));
                if !is_void_element(&element.tag) {
                    write_eager_all(&element.children, out).await?;
                }
                out.push_str(&render_close_tag(&element.tag));
            }
            DecodedNode::Fragment(fragment) => write_eager_all(&fragment.children, out).await?,
            DecodedNode::Suspense(suspense) => write_eager_all(&suspense.children, out).await?,
            DecodedNode::ErrorBoundary(boundary) => {
                let mut inner = String::new();
                match write_eager_all(&boundary.children, &mut inner).await {
                    Ok(()) => out.push_str(&inner),
                    Err(e) if !e.is_fatal() => {
                        debug!("Error boundary {} rendering fallback: {}", boundary.scope.id(), e);
                        write_eager(&boundary.fallback, out).await?;
                    }
                    Err(e) => return Err(e),
                }
            }
            DecodedNode::Async(slot) => {
                let resolved = slot.settled().await?;
                write_eager(&resolved, out).await?;
            }
            DecodedNode::Component(component) => {
                let rendered = component.render()?;
                write_eager(&rendered, out).await?;
            }
            DecodedNode::Raw(raw) => {
                out.push_str(&raw.html);
                for deferred in &raw.deferred {
                    let output = match deferred {
                        DeferredMarkup::Ready(output) => output.clone(),
                        DeferredMarkup::Slot(slot) => slot.settled().await?,
                    };
                    if let Some(html) = output {
                        out.push_str(&html);
                    }
                }
            }
        }
        Ok(())
    })
}

async fn write_eager_all(children: &[DecodedNode], out: &mut String) -> Result<(), RscError> {
    for child in children {
        write_eager(child, out).await?;
    }
    Ok(())
}

/// Output of a single synchronous render attempt.
pub enum Snapshot {
    Complete(String),
    /// A slot outside any pending Suspense is still pending; the wait
    /// resolves when it settles.
    Suspended(SlotWait),
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(html) => f.debug_tuple("Complete").field(html).finish(),
            Self::Suspended(_) => f.write_str("Suspended"),
        }
    }
}

/// Renders what is available now. Pending Suspense scopes show their
/// fallback; a pending slot anywhere else suspends the whole attempt.
pub fn snapshot(node: &DecodedNode) -> Result<Snapshot, RscError> {
    let mut snapshotter = Snapshotter::new(false);
    let mut html = String::new();
    Ok(match snapshotter.write(node, &mut html)? {
        Some(wait) => Snapshot::Suspended(wait),
        None => Snapshot::Complete(html),
    })
}

/// Retries [`snapshot`] once per settlement until an attempt completes.
pub async fn render_when_ready(node: &DecodedNode) -> Result<String, RscError> {
    let mut attempts = 0usize;
    loop {
        attempts += 1;
        match snapshot(node)? {
            Snapshot::Complete(html) => {
                trace!("Render completed after {} attempts", attempts);
                return Ok(html);
            }
            Snapshot::Suspended(wait) => wait.await,
        }
    }
}

/// A Suspense scope left behind a marker, with the ErrorBoundaries around it
/// from outermost to innermost.
#[derive(Debug, Clone)]
pub(crate) struct DeferredScope {
    pub(crate) suspense: Arc<DecodedSuspense>,
    pub(crate) enclosing: Vec<Arc<DecodedErrorBoundary>>,
}

/// Single-pass renderer over the current state of a decoded tree. With
/// `mark_boundaries`, unresolved Suspense fallbacks are wrapped in markers and
/// collected so a streaming renderer can replace them later. ErrorBoundaries
/// around a marked scope get markers of their own.
pub(crate) struct Snapshotter {
    mark_boundaries: bool,
    deferred: Vec<DeferredScope>,
    enclosing: Vec<Arc<DecodedErrorBoundary>>,
}

impl Snapshotter {
    pub(crate) fn new(mark_boundaries: bool) -> Self {
        Self { mark_boundaries, deferred: Vec::new(), enclosing: Vec::new() }
    }

    /// Starts below the given ErrorBoundaries, as when rendering a subtree
    /// that is streamed into an already marked region.
    pub(crate) fn with_enclosing(mut self, enclosing: Vec<Arc<DecodedErrorBoundary>>) -> Self {
        self.enclosing = enclosing;
        self
    }

    pub(crate) fn take_deferred(&mut self) -> Vec<DeferredScope> {
        std::mem::take(&mut self.deferred)
    }

    pub(crate) fn write_all(
        &mut self,
        children: &[DecodedNode],
        out: &mut String,
    ) -> Result<Option<SlotWait>, RscError> {
        for child in children {
            if let Some(wait) = self.write(child, out)? {
                return Ok(Some(wait));
            }
        }
        Ok(None)
    }

    pub(crate) fn write(
        &mut self,
        node: &DecodedNode,
        out: &mut String,
    ) -> Result<Option<SlotWait>, RscError> {
        match node {
            DecodedNode::Empty => {}
            DecodedNode::Text(text) => out.push_str(&escape_html(text)),
            DecodedNode::Element(element) => {
                out.push_str(&render_open_tag(&element.tag, &element.props));
                if !is_void_element(&element.tag)
                    && let Some(wait) = self.write_all(&element.children, out)?
                {
                    return Ok(Some(wait));
                }
                out.push_str(&render_close_tag(&element.tag));
            }
            DecodedNode::Fragment(fragment) => return self.write_all(&fragment.children, out),
            DecodedNode::Suspense(suspense) => return self.write_suspense(suspense, out),
            DecodedNode::ErrorBoundary(boundary) => {
                if boundary.scope.has_failed() {
                    return self.write(&boundary.fallback, out);
                }

                let checkpoint = self.deferred.len();
                let mut inner = String::new();
                self.enclosing.push(Arc::clone(boundary));
                let result = self.write_all(&boundary.children, &mut inner);
                self.enclosing.pop();

                match result {
                    Ok(None) if self.mark_boundaries && self.deferred.len() > checkpoint => {
                        let marker = error_boundary_marker(boundary.scope.id());
                        out.push_str(&format!("<template id=\"{marker}\"></template>"));
                        out.push_str(&inner);
                        out.push_str(&format!("<!--/{marker}-->"));
                    }
                    Ok(None) => out.push_str(&inner),
                    Ok(Some(wait)) => return Ok(Some(wait)),
                    Err(e) if !e.is_fatal() => {
                        self.deferred.truncate(checkpoint);
                        return self.write(&boundary.fallback, out);
                    }
                    Err(e) => return Err(e),
                }
            }
            DecodedNode::Async(slot) => match slot.read() {
                SlotRead::Ready(resolved) => return self.write(&resolved, out),
                SlotRead::Rejected(error) => return Err(error),
                SlotRead::Pending(wait) => return Ok(Some(wait)),
            },
            DecodedNode::Component(component) => {
                let rendered = component.render()?;
                return self.write(&rendered, out);
            }
            DecodedNode::Raw(raw) => {
                out.push_str(&raw.html);
                for deferred in &raw.deferred {
                    match deferred {
                        DeferredMarkup::Ready(Some(html)) => out.push_str(html),
                        DeferredMarkup::Ready(None) => {}
                        DeferredMarkup::Slot(slot) => match slot.read() {
                            SlotRead::Ready(Some(html)) => out.push_str(&html),
                            SlotRead::Ready(None) => {}
                            SlotRead::Rejected(error) => return Err(error),
                            SlotRead::Pending(wait) => return Ok(Some(wait)),
                        },
                    }
                }
            }
        }
        Ok(None)
    }

    fn write_suspense(
        &mut self,
        suspense: &Arc<DecodedSuspense>,
        out: &mut String,
    ) -> Result<Option<SlotWait>, RscError> {
        let state = suspense.scope.state();

        if state == SuspenseState::Resolved {
            let checkpoint = self.deferred.len();
            let mut inner = String::new();
            if self.write_all(&suspense.children, &mut inner)?.is_none() {
                out.push_str(&inner);
                return Ok(None);
            }
            self.deferred.truncate(checkpoint);
        }

        if self.mark_boundaries {
            let marker = boundary_marker(suspense.scope.id());
            let mut fallback = String::new();
            if let Some(wait) = self.write(&suspense.fallback, &mut fallback)? {
                return Ok(Some(wait));
            }
            out.push_str(&format!("<template id=\"{marker}\"></template>"));
            out.push_str(&fallback);
            out.push_str(&format!("<!--/{marker}-->"));
            self.deferred.push(DeferredScope {
                suspense: Arc::clone(suspense),
                enclosing: self.enclosing.clone(),
            });
            return Ok(None);
        }

        self.write(&suspense.fallback, out)
    }
}

pub(crate) fn boundary_marker(scope_id: usize) -> String {
    format!("S:{scope_id}")
}

pub(crate) fn error_boundary_marker(scope_id: usize) -> String {
    format!("E:{scope_id}")
}
