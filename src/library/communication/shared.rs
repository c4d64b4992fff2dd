use super::{BrokerError, BrokerTarget, ConnectionHandle, ConnectionManager};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Broker connection shared between concurrent request handlers
///
/// The handle can be replaced at runtime, at most one background reconnect is running at any time.
pub struct SharedConnection {
    manager: ConnectionManager,
    target: BrokerTarget,
    handle: RwLock<Option<ConnectionHandle>>,
    reconnecting: AtomicBool,
}

impl SharedConnection {
    /// Creates a new instance from an optional, already established handle
    pub fn new(
        manager: ConnectionManager,
        target: BrokerTarget,
        handle: Option<ConnectionHandle>,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            target,
            handle: RwLock::new(handle),
            reconnecting: AtomicBool::new(false),
        })
    }

    /// Publishes a raw payload using the current handle
    pub async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let handle = self.handle.read().await;
        self.manager.publish(handle.as_ref(), subject, payload).await
    }

    /// Whether the current handle is usable
    pub async fn is_connected(&self) -> bool {
        let handle = self.handle.read().await;
        self.manager.is_connected(handle.as_ref())
    }

    /// Closes the current handle and replaces it with a freshly established one
    pub async fn reconnect(&self) -> Result<(), BrokerError> {
        let mut handle = self.handle.write().await;

        if let Err(error) = self.manager.close(handle.as_ref()).await {
            debug!(%error, "Failed to close previous broker connection");
        }

        *handle = None;
        *handle = Some(self.manager.connect_to(&self.target).await?);

        Ok(())
    }

    /// Starts a reconnect in the background unless one is already running.
    /// Returns whether a new reconnect has been started.
    pub fn trigger_reconnect(self: &Arc<Self>) -> bool {
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let connection = self.clone();
        tokio::spawn(async move {
            match connection.reconnect().await {
                Ok(_) => info!("Reconnected to broker"),
                Err(error) => warn!(%error, "Failed to reconnect to broker"),
            }

            connection.reconnecting.store(false, Ordering::SeqCst);
        });

        true
    }
}
