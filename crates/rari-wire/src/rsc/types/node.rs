use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::Props;
use super::markup::RawMarkup;
use crate::error::RenderError;
use crate::rsc::components::ClientReference;

pub type NodeFuture = BoxFuture<'static, Result<Node, RenderError>>;

/// Producer-side UI tree. Consumed once by the encoder.
pub enum Node {
    Empty,
    Text(String),
    Element(Element),
    Fragment(Fragment),
    Suspense(Boundary),
    ErrorBoundary(Boundary),
    ClientReference(ClientElement),
    Component(ComponentElement),
    Async(AsyncNode),
    Raw(RawMarkup),
}

impl Node {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }

    pub fn fragment(children: impl IntoIterator<Item = Node>) -> Self {
        Self::Fragment(Fragment { key: None, children: children.into_iter().collect() })
    }

    pub fn suspense(fallback: impl Into<Node>, children: impl IntoIterator<Item = Node>) -> Self {
        Self::Suspense(Boundary::new(fallback, children))
    }

    pub fn error_boundary(
        fallback: impl Into<Node>,
        children: impl IntoIterator<Item = Node>,
    ) -> Self {
        Self::ErrorBoundary(Boundary::new(fallback, children))
    }

    pub fn client(reference: ClientReference) -> ClientElement {
        ClientElement {
            reference,
            key: None,
            props: Props::new(),
            children: Vec::new(),
        }
    }

    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<Node, RenderError>> + Send + 'static,
    {
        Self::Async(AsyncNode::new(future))
    }

    pub fn raw(markup: RawMarkup) -> Self {
        Self::Raw(markup)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Text(_) => "text",
            Self::Element(_) => "element",
            Self::Fragment(_) => "fragment",
            Self::Suspense(_) => "suspense",
            Self::ErrorBoundary(_) => "error-boundary",
            Self::ClientReference(_) => "client-reference",
            Self::Component(_) => "component",
            Self::Async(_) => "async",
            Self::Raw(_) => "raw",
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Element(element) => f
                .debug_struct("Element")
                .field("tag", &element.tag)
                .field("key", &element.key)
                .field("children", &element.children)
                .finish_non_exhaustive(),
            Self::ClientReference(client) => {
                f.debug_tuple("ClientReference").field(&client.reference).finish()
            }
            Self::Component(component) => {
                f.debug_tuple("Component").field(&component.component.name()).finish()
            }
            other => f.write_str(other.kind()),
        }
    }
}

impl From<&str> for Node {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Node {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Self::Element(element)
    }
}

impl From<ClientElement> for Node {
    fn from(element: ClientElement) -> Self {
        Self::ClientReference(element)
    }
}

impl From<ComponentElement> for Node {
    fn from(element: ComponentElement) -> Self {
        Self::Component(element)
    }
}

impl From<RawMarkup> for Node {
    fn from(markup: RawMarkup) -> Self {
        Self::Raw(markup)
    }
}

pub struct Element {
    pub tag: String,
    pub key: Option<String>,
    pub props: Props,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into(), key: None, props: Props::new(), children: Vec::new() }
    }

    pub fn with_props(tag: impl Into<String>, props: Props) -> Self {
        Self { tag: tag.into(), key: None, props, children: Vec::new() }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_prop(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_prop(name, value);
        self
    }

    pub fn with_child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn add_prop(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.props.insert(name.into(), value.into());
    }

    pub fn get_prop(&self, name: &str) -> Option<&Value> {
        self.props.get(name)
    }
}

pub struct Fragment {
    pub key: Option<String>,
    pub children: Vec<Node>,
}

/// Shared shape of Suspense and ErrorBoundary nodes.
pub struct Boundary {
    pub key: Option<String>,
    pub fallback: Box<Node>,
    pub children: Vec<Node>,
}

impl Boundary {
    pub fn new(fallback: impl Into<Node>, children: impl IntoIterator<Item = Node>) -> Self {
        Self {
            key: None,
            fallback: Box::new(fallback.into()),
            children: children.into_iter().collect(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// A node whose implementation only exists on the consumer side.
pub struct ClientElement {
    pub reference: ClientReference,
    pub key: Option<String>,
    pub props: Props,
    pub children: Vec<Node>,
}

impl ClientElement {
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_prop(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }
}

pub struct ComponentProps {
    pub key: Option<String>,
    pub props: Props,
    pub children: Vec<Node>,
}

/// Output of invoking a server component.
pub enum Rendered {
    Ready(Node),
    Pending(NodeFuture),
}

type ComponentFn = dyn Fn(ComponentProps) -> Result<Rendered, RenderError> + Send + Sync;

#[derive(Clone)]
pub struct ServerComponent {
    name: Arc<str>,
    render: Arc<ComponentFn>,
}

impl ServerComponent {
    pub fn new<F>(name: impl Into<Arc<str>>, render: F) -> Self
    where
        F: Fn(ComponentProps) -> Result<Rendered, RenderError> + Send + Sync + 'static,
    {
        Self { name: name.into(), render: Arc::new(render) }
    }

    pub fn sync<F>(name: impl Into<Arc<str>>, render: F) -> Self
    where
        F: Fn(ComponentProps) -> Result<Node, RenderError> + Send + Sync + 'static,
    {
        Self::new(name, move |props| render(props).map(Rendered::Ready))
    }

    pub fn from_async<F, Fut>(name: impl Into<Arc<str>>, render: F) -> Self
    where
        F: Fn(ComponentProps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Node, RenderError>> + Send + 'static,
    {
        Self::new(name, move |props| Ok(Rendered::Pending(render(props).boxed())))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the component. A panic is reported as a render error so one
    /// broken component cannot take down the whole stream.
    pub fn invoke(&self, props: ComponentProps) -> Result<Rendered, RenderError> {
        std::panic::catch_unwind(AssertUnwindSafe(|| (self.render)(props)))
            .unwrap_or_else(|payload| Err(panic_to_render_error(self.name(), payload.as_ref())))
    }

    pub fn element(&self) -> ComponentElement {
        ComponentElement {
            component: self.clone(),
            key: None,
            props: Props::new(),
            children: Vec::new(),
        }
    }
}

pub(crate) fn panic_to_render_error(
    context: &str,
    payload: &(dyn std::any::Any + Send),
) -> RenderError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());

    RenderError::new(format!("{context} panicked: {message}"))
}

pub struct ComponentElement {
    pub component: ServerComponent,
    pub key: Option<String>,
    pub props: Props,
    pub children: Vec<Node>,
}

impl ComponentElement {
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_prop(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn invoke(self) -> Result<Rendered, RenderError> {
        let Self { component, key, props, children } = self;
        component.invoke(ComponentProps { key, props, children })
    }
}

pub struct AsyncNode {
    future: NodeFuture,
}

impl AsyncNode {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<Node, RenderError>> + Send + 'static,
    {
        Self { future: future.boxed() }
    }

    pub fn into_future(self) -> NodeFuture {
        self.future
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_element() {
        let element = Element::new("div");
        assert_eq!(element.tag, "div");
        assert!(element.props.is_empty());
        assert!(element.key.is_none());
    }

    #[test]
    fn test_props_keep_insertion_order() {
        let element = Element::new("a")
            .with_prop("href", "/home")
            .with_prop("class", "link")
            .with_prop("data-id", 7);

        let keys: Vec<&str> = element.props.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["href", "class", "data-id"]);
        assert_eq!(element.get_prop("data-id"), Some(&json!(7)));
    }

    #[test]
    fn test_with_key_and_children() {
        let element = Element::new("ul")
            .with_key("list")
            .with_child(Element::new("li").with_child("one"))
            .with_child(Element::new("li").with_child("two"));

        assert_eq!(element.key.as_deref(), Some("list"));
        assert_eq!(element.children.len(), 2);
    }

    #[test]
    fn test_sync_component_invocation() {
        let component = ServerComponent::sync("Greeting", |props| {
            let name = props.props.get("name").and_then(Value::as_str).unwrap_or("world");
            Ok(Element::new("p").with_child(format!("Hello {name}")).into())
        });

        let rendered = component.element().with_prop("name", "rari").invoke().unwrap();
        match rendered {
            Rendered::Ready(Node::Element(element)) => {
                assert_eq!(element.tag, "p");
                assert!(matches!(&element.children[0], Node::Text(t) if t == "Hello rari"));
            }
            _ => panic!("Expected a ready element"),
        }
    }

    #[test]
    fn test_component_panic_becomes_render_error() {
        let component = ServerComponent::sync("Exploding", |_| panic!("kaboom"));

        let result = component.element().invoke();
        let error = result.err().expect("panic should surface as an error");
        assert!(error.message.contains("Exploding"));
        assert!(error.message.contains("kaboom"));
    }

    #[test]
    fn test_async_component_is_pending() {
        let component = ServerComponent::from_async("Slow", |_| async { Ok(Node::text("done")) });

        assert!(matches!(component.element().invoke(), Ok(Rendered::Pending(_))));
    }
}
