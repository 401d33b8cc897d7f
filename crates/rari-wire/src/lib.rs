pub mod config;
pub mod error;
pub mod rsc;
pub mod server;

pub use config::{ConfigError, Mode, WireConfig};
pub use error::{RenderError, RscError};
pub use rsc::{
    ClientManifest, ClientModuleLoader, ClientReference, Completion, DecodeOptions, Decoded,
    DecodedNode, EncodeOptions, Node, decode, encode,
};
