pub mod components;
pub mod rendering;
pub mod streaming;
pub mod types;
pub mod wire_format;

pub use components::{
    ClientComponent, ClientManifest, ClientModuleLoader, ClientProps, ClientReference,
    ClientReferenceRegistry, FnModuleLoader, ModuleExport, ModuleExports, StaticModuleLoader,
};
pub use streaming::{Completion, DecodeOptions, Decoded, decode};
pub use types::{DecodedNode, Element, Node, ServerComponent};
pub use wire_format::{EncodeOptions, RscByteStream, encode};
