pub mod registry;

use async_trait::async_trait;
use futures::future::BoxFuture;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::RscError;
use crate::rsc::types::{DecodedNode, Props};

pub use registry::ClientReferenceRegistry;

/// Opaque pointer to a consumer-side implementation: a module id and one of
/// its named exports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientReference {
    pub id: String,
    pub export_name: String,
}

impl ClientReference {
    pub fn new(id: impl Into<String>, export_name: impl Into<String>) -> Self {
        Self { id: id.into(), export_name: export_name.into() }
    }

    /// Parses `path/to/module#Export`. A bare module id refers to `default`.
    pub fn parse(specifier: &str) -> Option<Self> {
        let (id, export_name) = match specifier.split_once('#') {
            Some((id, export_name)) => (id, export_name),
            None => (specifier, "default"),
        };

        if id.is_empty() || export_name.is_empty() {
            return None;
        }

        Some(Self::new(id, export_name))
    }

    pub fn specifier(&self) -> String {
        format!("{}#{}", self.id, self.export_name)
    }
}

impl std::fmt::Display for ClientReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.id, self.export_name)
    }
}

/// Producer-side allow-list of client references the consumer can resolve.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientManifest {
    modules: FxHashMap<String, FxHashSet<String>>,
}

impl ClientManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, export_name: impl Into<String>) -> ClientReference {
        let reference = ClientReference::new(id, export_name);
        self.modules
            .entry(reference.id.clone())
            .or_default()
            .insert(reference.export_name.clone());
        reference
    }

    pub fn register_specifier(&mut self, specifier: &str) -> Result<ClientReference, RscError> {
        let reference = ClientReference::parse(specifier).ok_or_else(|| {
            RscError::configuration(format!("Invalid client reference specifier: {specifier}"))
        })?;
        Ok(self.register(reference.id, reference.export_name))
    }

    pub fn contains(&self, reference: &ClientReference) -> bool {
        self.modules
            .get(&reference.id)
            .is_some_and(|exports| exports.contains(&reference.export_name))
    }

    pub fn is_registered(&self, id: &str, export_name: &str) -> bool {
        self.modules.get(id).is_some_and(|exports| exports.contains(export_name))
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }
}

pub struct ClientProps {
    pub key: Option<String>,
    pub props: Props,
    pub children: Vec<DecodedNode>,
}

/// Consumer-side implementation behind a client reference.
pub trait ClientComponent: Send + Sync {
    fn render(&self, props: &ClientProps) -> Result<DecodedNode, RscError>;
}

impl<F> ClientComponent for F
where
    F: Fn(&ClientProps) -> Result<DecodedNode, RscError> + Send + Sync,
{
    fn render(&self, props: &ClientProps) -> Result<DecodedNode, RscError> {
        self(props)
    }
}

#[derive(Clone)]
pub enum ModuleExport {
    Component(Arc<dyn ClientComponent>),
    Value(serde_json::Value),
}

/// Named exports of one loaded client module.
#[derive(Clone, Default)]
pub struct ModuleExports {
    exports: FxHashMap<String, ModuleExport>,
}

impl ModuleExports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_component<C>(mut self, name: impl Into<String>, component: C) -> Self
    where
        C: ClientComponent + 'static,
    {
        self.exports.insert(name.into(), ModuleExport::Component(Arc::new(component)));
        self
    }

    pub fn with_value(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.exports.insert(name.into(), ModuleExport::Value(value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ModuleExport> {
        self.exports.get(name)
    }

    pub fn len(&self) -> usize {
        self.exports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }
}

impl std::fmt::Debug for ModuleExports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.exports.keys()).finish()
    }
}

/// Host hook that fetches a client module by id.
#[async_trait]
pub trait ClientModuleLoader: Send + Sync {
    async fn load(&self, id: &str) -> Result<ModuleExports, RscError>;
}

type LoadFn = dyn Fn(String) -> BoxFuture<'static, Result<ModuleExports, RscError>> + Send + Sync;

/// Adapts a closure into a [`ClientModuleLoader`].
pub struct FnModuleLoader {
    load: Box<LoadFn>,
}

impl FnModuleLoader {
    pub fn new<F>(load: F) -> Self
    where
        F: Fn(String) -> BoxFuture<'static, Result<ModuleExports, RscError>> + Send + Sync + 'static,
    {
        Self { load: Box::new(load) }
    }
}

#[async_trait]
impl ClientModuleLoader for FnModuleLoader {
    async fn load(&self, id: &str) -> Result<ModuleExports, RscError> {
        (self.load)(id.to_string()).await
    }
}

/// Loader over modules known up front, keyed by id.
#[derive(Default)]
pub struct StaticModuleLoader {
    modules: FxHashMap<String, ModuleExports>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, id: impl Into<String>, exports: ModuleExports) -> Self {
        self.modules.insert(id.into(), exports);
        self
    }
}

#[async_trait]
impl ClientModuleLoader for StaticModuleLoader {
    async fn load(&self, id: &str) -> Result<ModuleExports, RscError> {
        self.modules
            .get(id)
            .cloned()
            .ok_or_else(|| RscError::module_load(format!("Client module not found: {id}")))
    }
}
