use std::sync::Arc;

use super::Props;
use super::markup::DecodedRaw;
use crate::error::RscError;
use crate::rsc::components::{ClientComponent, ClientProps, ClientReference};
use crate::rsc::streaming::boundary_manager::{ErrorBoundaryHandle, SuspenseHandle};
use crate::rsc::streaming::slot::AsyncSlot;

/// Consumer-side tree. Cheap to clone; pending parts are shared slots.
#[derive(Debug, Clone)]
pub enum DecodedNode {
    Empty,
    Text(String),
    Element(Arc<DecodedElement>),
    Fragment(Arc<DecodedFragment>),
    Suspense(Arc<DecodedSuspense>),
    ErrorBoundary(Arc<DecodedErrorBoundary>),
    Async(AsyncSlot<DecodedNode>),
    Component(Arc<ResolvedComponent>),
    Raw(Arc<DecodedRaw>),
}

impl DecodedNode {
    pub fn as_element(&self) -> Option<&DecodedElement> {
        match self {
            Self::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn children(&self) -> &[DecodedNode] {
        match self {
            Self::Element(element) => &element.children,
            Self::Fragment(fragment) => &fragment.children,
            Self::Suspense(suspense) => &suspense.children,
            Self::ErrorBoundary(boundary) => &boundary.children,
            Self::Component(component) => &component.children,
            _ => &[],
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Element(element) => element.key.as_deref(),
            Self::Fragment(fragment) => fragment.key.as_deref(),
            Self::Suspense(suspense) => suspense.key.as_deref(),
            Self::ErrorBoundary(boundary) => boundary.key.as_deref(),
            Self::Component(component) => component.key.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecodedElement {
    pub tag: String,
    pub key: Option<String>,
    pub props: Props,
    pub children: Vec<DecodedNode>,
}

#[derive(Debug, Clone)]
pub struct DecodedFragment {
    pub key: Option<String>,
    pub children: Vec<DecodedNode>,
}

#[derive(Debug, Clone)]
pub struct DecodedSuspense {
    pub key: Option<String>,
    pub fallback: DecodedNode,
    pub children: Vec<DecodedNode>,
    pub scope: SuspenseHandle,
}

#[derive(Debug, Clone)]
pub struct DecodedErrorBoundary {
    pub key: Option<String>,
    pub fallback: DecodedNode,
    pub children: Vec<DecodedNode>,
    pub scope: ErrorBoundaryHandle,
}

/// A client reference whose implementation has been loaded.
pub struct ResolvedComponent {
    pub reference: ClientReference,
    pub component: Arc<dyn ClientComponent>,
    pub key: Option<String>,
    pub props: Props,
    pub children: Vec<DecodedNode>,
}

impl ResolvedComponent {
    pub fn render(&self) -> Result<DecodedNode, RscError> {
        self.component.render(&ClientProps {
            key: self.key.clone(),
            props: self.props.clone(),
            children: self.children.clone(),
        })
    }
}

impl std::fmt::Debug for ResolvedComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedComponent")
            .field("reference", &self.reference)
            .field("key", &self.key)
            .field("props", &self.props)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}
