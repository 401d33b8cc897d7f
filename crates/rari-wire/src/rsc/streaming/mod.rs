pub mod boundary_manager;
mod reconstruct;
pub mod slot;


use bytes::Bytes;
use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, Stream};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::config::WireConfig;
use crate::error::RscError;
use crate::rsc::components::{ClientModuleLoader, ClientReferenceRegistry};
use crate::rsc::types::DecodedNode;
use crate::rsc::wire_format::row::RowReader;

pub use boundary_manager::{
    BoundaryRuntime, BoundaryStats, ErrorBoundaryHandle, ErrorBoundaryState, ScopeContext,
    SuspenseHandle, SuspenseState,
};
use reconstruct::Reconstructor;
pub use slot::{AsyncSlot, SlotKey, SlotRead, SlotState, SlotWait};

#[derive(Clone, Default)]
pub struct DecodeOptions {
    /// Required to resolve client references. Without it every client
    /// reference settles as a module load error.
    pub loader: Option<Arc<dyn ClientModuleLoader>>,
    pub config: WireConfig,
}

impl DecodeOptions {
    pub fn with_loader(loader: Arc<dyn ClientModuleLoader>) -> Self {
        Self { loader: Some(loader), config: WireConfig::default() }
    }
}

/// Settles once the whole stream has been read and every slot has settled.
/// Fails with the first unrecovered rejection or the stream error.
#[derive(Clone)]
pub struct Completion {
    inner: Shared<BoxFuture<'static, Result<(), RscError>>>,
}

impl Completion {
    fn from_task(handle: JoinHandle<Result<(), RscError>>) -> Self {
        let inner = async move {
            match handle.await {
                Ok(result) => result,
                Err(join_error) => {
                    Err(RscError::decoding(format!("Decoder task failed: {join_error}")))
                }
            }
        }
        .boxed()
        .shared();

        Self { inner }
    }

    pub fn is_settled(&self) -> bool {
        self.inner.peek().is_some()
    }

    pub fn result(&self) -> Option<Result<(), RscError>> {
        self.inner.peek().cloned()
    }
}

impl Future for Completion {
    type Output = Result<(), RscError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion").field("settled", &self.is_settled()).finish()
    }
}

/// Result of [`decode`]: the tree as known from the root row, plus a handle
/// on the rest of the stream.
pub struct Decoded {
    pub value: DecodedNode,
    pub completion: Completion,
    runtime: Arc<BoundaryRuntime>,
}

impl Decoded {
    pub fn runtime(&self) -> &BoundaryRuntime {
        &self.runtime
    }

    pub fn stats(&self) -> BoundaryStats {
        self.runtime.stats()
    }
}

/// Decodes a row stream. Returns as soon as the root row has been read;
/// the rest of the stream is consumed by a background task that settles
/// slots as rows arrive.
pub async fn decode<S>(stream: S, options: DecodeOptions) -> Result<Decoded, RscError>
where
    S: Stream<Item = Result<Bytes, RscError>> + Send + 'static,
{
    let DecodeOptions { loader, config } = options;
    config.validate().map_err(|e| RscError::configuration(e.to_string()))?;

    let mut reader = RowReader::new(Box::pin(stream), config.max_row_bytes);
    let runtime = Arc::new(BoundaryRuntime::new());
    let registry = loader.map(ClientReferenceRegistry::new);
    let mut reconstructor = Reconstructor::new(Arc::clone(&runtime), registry, config.log_rows);

    let root = reader
        .next_row()
        .await?
        .ok_or_else(|| RscError::decoding("Stream ended before the root row".to_string()))?;
    let value = reconstructor.reconstruct_root(root)?;

    let handle = tokio::spawn(pump(reader, reconstructor));

    Ok(Decoded { value, completion: Completion::from_task(handle), runtime })
}

async fn pump<S>(mut reader: RowReader<S>, mut reconstructor: Reconstructor) -> Result<(), RscError>
where
    S: Stream<Item = Result<Bytes, RscError>> + Unpin,
{
    let mut stream_open = true;

    loop {
        tokio::select! {
            row = reader.next_row(), if stream_open => match row {
                Ok(Some(row)) => {
                    if let Err(e) = reconstructor.apply_row(row) {
                        error!("Failed to apply row: {}", e);
                        reconstructor.abort(&e);
                        return Err(e);
                    }
                }
                Ok(None) => {
                    debug!("Stream ended after {} rows", reader.rows_read());
                    stream_open = false;
                }
                Err(e) => {
                    error!("Failed to read row: {}", e);
                    reconstructor.abort(&e);
                    return Err(e);
                }
            },
            Some(outcome) = reconstructor.next_load(), if reconstructor.has_loads() => {
                reconstructor.apply_load(outcome);
            }
            else => break,
        }
    }

    let result = reconstructor.finish();
    match &result {
        Ok(()) => debug!("Decode completed"),
        Err(e) => error!("Decode completed with error: {}", e),
    }
    result
}
