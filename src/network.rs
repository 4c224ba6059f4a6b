use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::tmdb::CatalogApi;

/// Shared online/offline flag. Screens read it before every load and react to
/// changes through `subscribe`.
#[derive(Clone)]
pub struct NetworkMonitor {
    online: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (online, _) = watch::channel(online);
        Self { online: Arc::new(online) }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    pub fn set_online(&self, online: bool) {
        let changed = self.online.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
        if changed {
            info!(online, "connectivity changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    /// Marks the monitor online if the catalog answers, offline otherwise.
    pub async fn probe(&self, catalog: &dyn CatalogApi) -> bool {
        let online = match catalog.probe().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "catalog unreachable");
                false
            },
        };
        self.set_online(online);
        online
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
