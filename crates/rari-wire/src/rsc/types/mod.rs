pub mod decoded;
pub mod markup;
pub mod node;

pub use decoded::{
    DecodedElement, DecodedErrorBoundary, DecodedFragment, DecodedNode, DecodedSuspense,
    ResolvedComponent,
};
pub use markup::{
    CallbackOutput, DecodedRaw, DeferredMarkup, HtmlPhase, MarkupCallback, MarkupFuture, RawMarkup,
};
pub use node::{
    AsyncNode, Boundary, ClientElement, ComponentElement, ComponentProps, Element, Fragment, Node,
    NodeFuture, Rendered, ServerComponent,
};

/// Element props. Insertion order is preserved through the wire.
pub type Props = serde_json::Map<String, serde_json::Value>;
