use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::watch;

use crate::error::RscError;

/// Identifies a slot: a row id, or a client reference resolved on this side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKey {
    Row(u32),
    ClientReference(u32),
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Row(id) => write!(f, "row {id}"),
            Self::ClientReference(id) => write!(f, "client reference #{id}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SlotState<T> {
    Pending,
    Fulfilled(T),
    Rejected(RscError),
}

impl<T> SlotState<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Synchronous view of a slot.
pub enum SlotRead<T> {
    Ready(T),
    Rejected(RscError),
    Pending(SlotWait),
}

/// Resolves once the slot it was taken from settles, either way.
pub struct SlotWait {
    inner: BoxFuture<'static, ()>,
}

impl Future for SlotWait {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.inner.poll_unpin(cx)
    }
}

/// Consumer handle on a value that settles later in the stream.
#[derive(Clone)]
pub struct AsyncSlot<T> {
    key: SlotKey,
    receiver: watch::Receiver<SlotState<T>>,
}

pub(crate) struct SlotWriter<T> {
    key: SlotKey,
    sender: watch::Sender<SlotState<T>>,
}

pub(crate) fn slot_channel<T>(key: SlotKey) -> (SlotWriter<T>, AsyncSlot<T>) {
    let (sender, receiver) = watch::channel(SlotState::Pending);
    (SlotWriter { key, sender }, AsyncSlot { key, receiver })
}

impl<T> SlotWriter<T> {
    pub(crate) fn key(&self) -> SlotKey {
        self.key
    }

    pub(crate) fn fulfil(self, value: T) {
        self.sender.send_replace(SlotState::Fulfilled(value));
    }

    pub(crate) fn reject(self, error: RscError) {
        self.sender.send_replace(SlotState::Rejected(error));
    }
}

impl<T> AsyncSlot<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn key(&self) -> SlotKey {
        self.key
    }

    pub fn state(&self) -> SlotState<T> {
        self.receiver.borrow().clone()
    }

    pub fn is_settled(&self) -> bool {
        !self.receiver.borrow().is_pending()
    }

    pub fn read(&self) -> SlotRead<T> {
        match self.state() {
            SlotState::Fulfilled(value) => SlotRead::Ready(value),
            SlotState::Rejected(error) => SlotRead::Rejected(error),
            SlotState::Pending => SlotRead::Pending(self.wait()),
        }
    }

    /// Waits for the slot to settle. A stream that closes first leaves the
    /// slot pending forever, which is reported as a decoding error.
    pub async fn settled(&self) -> Result<T, RscError> {
        let mut receiver = self.receiver.clone();
        let state = {
            let guard = receiver.wait_for(|state| !state.is_pending()).await.map_err(|_| {
                RscError::decoding(format!("Stream closed before {} settled", self.key))
            })?;
            guard.clone()
        };

        match state {
            SlotState::Fulfilled(value) => Ok(value),
            SlotState::Rejected(error) => Err(error),
            SlotState::Pending => {
                Err(RscError::decoding(format!("{} is still pending", self.key)))
            }
        }
    }

    pub fn wait(&self) -> SlotWait {
        let slot = self.clone();
        SlotWait {
            inner: async move {
                let _ = slot.settled().await;
            }
            .boxed(),
        }
    }
}

impl<T> std::fmt::Debug for AsyncSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.receiver.borrow() {
            SlotState::Pending => "pending",
            SlotState::Fulfilled(_) => "fulfilled",
            SlotState::Rejected(_) => "rejected",
        };
        f.debug_struct("AsyncSlot").field("key", &self.key).field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_read_before_and_after_fulfil() {
        let (writer, slot) = slot_channel::<String>(SlotKey::Row(1));
        assert!(!slot.is_settled());
        assert!(matches!(slot.read(), SlotRead::Pending(_)));

        writer.fulfil("done".to_string());
        assert!(slot.is_settled());
        assert!(matches!(slot.read(), SlotRead::Ready(value) if value == "done"));
        assert_eq!(slot.settled().await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_wait_resolves_on_rejection() {
        let (writer, slot) = slot_channel::<String>(SlotKey::Row(2));
        let SlotRead::Pending(wait) = slot.read() else {
            panic!("slot should be pending");
        };

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            writer.reject(RscError::rejected("nope"));
        });

        tokio::time::timeout(Duration::from_secs(1), wait).await.unwrap();
        assert!(matches!(slot.settled().await, Err(RscError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_dropped_writer_is_a_decoding_error() {
        let (writer, slot) = slot_channel::<u32>(SlotKey::ClientReference(0));
        drop(writer);

        match slot.settled().await {
            Err(RscError::Decoding(message)) => assert!(message.contains("client reference #0")),
            other => panic!("Expected decoding error, got {other:?}"),
        }
    }

    #[test]
    fn test_debug_shows_state() {
        let (writer, slot) = slot_channel::<u32>(SlotKey::Row(7));
        assert!(format!("{slot:?}").contains("pending"));
        writer.fulfil(1);
        assert!(format!("{slot:?}").contains("fulfilled"));
    }
}
