use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{ClientComponent, ClientModuleLoader, ModuleExport, ModuleExports};
use crate::error::RscError;

type ModuleLoad = Shared<BoxFuture<'static, Result<Arc<ModuleExports>, RscError>>>;

/// Per-decode cache of client module loads. Each module id is requested
/// from the loader at most once; concurrent resolutions share the load.
pub struct ClientReferenceRegistry {
    loader: Arc<dyn ClientModuleLoader>,
    modules: DashMap<String, ModuleLoad>,
}

impl ClientReferenceRegistry {
    pub fn new(loader: Arc<dyn ClientModuleLoader>) -> Self {
        Self { loader, modules: DashMap::new() }
    }

    fn load_module(&self, id: &str) -> ModuleLoad {
        self.modules
            .entry(id.to_string())
            .or_insert_with(|| {
                let loader = Arc::clone(&self.loader);
                let id = id.to_string();
                async move {
                    debug!("Loading client module {}", id);
                    match loader.load(&id).await {
                        Ok(exports) => Ok(Arc::new(exports)),
                        Err(e) => {
                            warn!("Failed to load client module {}: {}", id, e);
                            Err(e)
                        }
                    }
                }
                .boxed()
                .shared()
            })
            .clone()
    }

    /// Resolves `export_name` of module `reference_id` to a component. Load
    /// failures are cached and not retried.
    pub fn resolve(
        &self,
        reference_id: &str,
        export_name: &str,
    ) -> impl Future<Output = Result<Arc<dyn ClientComponent>, RscError>> + Send + 'static {
        let module = self.load_module(reference_id);
        let reference_id = reference_id.to_string();
        let export_name = export_name.to_string();

        async move {
            let exports = module.await?;
            match exports.get(&export_name) {
                Some(ModuleExport::Component(component)) => Ok(Arc::clone(component)),
                Some(ModuleExport::Value(_)) | None => Err(RscError::module_load(format!(
                    "Invalid client reference: {export_name} ({reference_id})"
                ))),
            }
        }
    }

    pub fn is_cached(&self, reference_id: &str) -> bool {
        self.modules.contains_key(reference_id)
    }

    pub fn cached_module_count(&self) -> usize {
        self.modules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rsc::components::{ClientProps, FnModuleLoader};
    use crate::rsc::types::DecodedNode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counter_exports() -> ModuleExports {
        ModuleExports::new()
            .with_component("Counter", |props: &ClientProps| {
                let start = props.props.get("start").and_then(serde_json::Value::as_i64).unwrap_or(0);
                Ok::<_, RscError>(DecodedNode::Text(format!("count: {start}")))
            })
            .with_value("COUNTER_VERSION", serde_json::json!(2))
    }

    fn counting_loader(calls: Arc<AtomicUsize>) -> Arc<dyn ClientModuleLoader> {
        Arc::new(FnModuleLoader::new(move |id| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                if id == "Counter.tsx" {
                    Ok(counter_exports())
                } else {
                    Err(RscError::module_load(format!("no module {id}")))
                }
            }
            .boxed()
        }))
    }

    #[tokio::test]
    async fn test_concurrent_resolutions_share_one_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ClientReferenceRegistry::new(counting_loader(Arc::clone(&calls)));

        let (first, second) = tokio::join!(
            registry.resolve("Counter.tsx", "Counter"),
            registry.resolve("Counter.tsx", "Counter"),
        );

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_cached("Counter.tsx"));
        assert_eq!(registry.cached_module_count(), 1);
    }

    #[tokio::test]
    async fn test_resolved_component_renders() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ClientReferenceRegistry::new(counting_loader(calls));

        let component = registry.resolve("Counter.tsx", "Counter").await.unwrap();
        let mut props = crate::rsc::types::Props::new();
        props.insert("start".to_string(), serde_json::json!(5));
        let rendered = component
            .render(&ClientProps { key: None, props, children: Vec::new() })
            .unwrap();

        assert_eq!(rendered.as_text(), Some("count: 5"));
    }

    #[tokio::test]
    async fn test_invalid_exports() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ClientReferenceRegistry::new(counting_loader(Arc::clone(&calls)));

        let missing = registry.resolve("Counter.tsx", "Missing").await;
        match missing {
            Err(RscError::ModuleLoad(message)) => {
                assert_eq!(message, "Invalid client reference: Missing (Counter.tsx)");
            }
            other => panic!("Expected ModuleLoad error, got {:?}", other.map(|_| ())),
        }

        let not_callable = registry.resolve("Counter.tsx", "COUNTER_VERSION").await;
        assert!(matches!(not_callable, Err(RscError::ModuleLoad(_))));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ClientReferenceRegistry::new(counting_loader(Arc::clone(&calls)));

        let first = registry.resolve("Broken.tsx", "Broken").await;
        let second = registry.resolve("Broken.tsx", "Broken").await;

        assert!(matches!(first, Err(RscError::ModuleLoad(_))));
        assert!(matches!(second, Err(RscError::ModuleLoad(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
