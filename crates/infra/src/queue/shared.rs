use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use hgcs_core::QueueResult;

use super::r#trait::{QueueClient, QueueConnector};

/// The process-wide queue handle shared by all agents.
///
/// Connects lazily on first [`acquire`](Self::acquire) and hands the same client
/// to every caller afterwards. After a connection-level failure an agent calls
/// [`invalidate`](Self::invalidate) so the next acquire reconnects.
pub struct SharedQueue {
    connector: Arc<dyn QueueConnector>,
    client: Mutex<Option<Arc<dyn QueueClient>>>,
}

impl core::fmt::Debug for SharedQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedQueue")
            .field("connected", &self.client.lock().is_some())
            .finish()
    }
}

impl SharedQueue {
    pub fn new(connector: Arc<dyn QueueConnector>) -> Self {
        Self {
            connector,
            client: Mutex::new(None),
        }
    }

    pub fn arc(connector: Arc<dyn QueueConnector>) -> Arc<Self> {
        Arc::new(Self::new(connector))
    }

    /// Return the cached client, connecting first if there is none.
    ///
    /// The connect itself runs unlocked, so agents racing here may each open a
    /// client; the first one installed wins and the others are dropped.
    pub fn acquire(&self) -> QueueResult<Arc<dyn QueueClient>> {
        if let Some(client) = self.client.lock().clone() {
            return Ok(client);
        }
        let client = self.connector.connect()?;

        let mut slot = self.client.lock();
        match slot.as_ref() {
            Some(installed) => {
                debug!("another agent connected first; reusing its client");
                Ok(installed.clone())
            }
            None => {
                info!("connected to job queue");
                *slot = Some(client.clone());
                Ok(client)
            }
        }
    }

    /// Drop the cached client.
    pub fn invalidate(&self) {
        if self.client.lock().take().is_some() {
            debug!("dropped cached job queue connection");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.lock().is_some()
    }
}
