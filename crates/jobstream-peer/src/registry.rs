use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::endpoint::Endpoint;

/// Directory of live server-side endpoints keyed by remote address.
///
/// The map is only touched while holding the internal guard, and the guard
/// is never held across stream I/O: endpoints are closed after it is released.
#[derive(Default)]
pub struct Registry {
    endpoints: Mutex<HashMap<String, Arc<Endpoint>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, Arc<Endpoint>>> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an endpoint under its identity.
    ///
    /// An endpoint already registered under the same identity is evicted and
    /// closed.
    pub fn insert(&self, endpoint: Arc<Endpoint>) {
        let id = endpoint.id().to_string();
        let replaced = self.guard().insert(id, endpoint);
        if let Some(previous) = replaced {
            warn!(endpoint = %previous.id(), "identity reused; closing previous connection");
            previous.close();
        }
    }

    /// Look up a live endpoint.
    pub fn lookup(&self, id: &str) -> Option<Arc<Endpoint>> {
        self.guard().get(id).cloned()
    }

    /// Remove an endpoint and close its stream and outbound queue.
    ///
    /// Returns the removed endpoint; removing an absent identity is a no-op
    /// returning `None`.
    pub fn remove(&self, id: &str) -> Option<Arc<Endpoint>> {
        let removed = self.guard().remove(id);
        if let Some(endpoint) = &removed {
            endpoint.close();
            info!(endpoint = %id, "client disconnected");
        }
        removed
    }

    /// Teardown path: remove `endpoint` only if it is the instance registered
    /// under its identity. The endpoint is closed either way.
    pub fn remove_endpoint(&self, endpoint: &Endpoint) -> bool {
        let removed = {
            let mut map = self.guard();
            let registered = map
                .get(endpoint.id())
                .is_some_and(|entry| std::ptr::eq(Arc::as_ptr(entry), endpoint));
            registered && map.remove(endpoint.id()).is_some()
        };
        endpoint.close();
        if removed {
            info!(endpoint = %endpoint.id(), "client disconnected");
        }
        removed
    }

    /// Number of live endpoints.
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    /// Whether no endpoint is registered.
    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// Identities of all live endpoints, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.guard().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove and close every endpoint.
    pub fn close_all(&self) -> Vec<Arc<Endpoint>> {
        let drained: Vec<Arc<Endpoint>> = self.guard().drain().map(|(_, ep)| ep).collect();
        for endpoint in &drained {
            endpoint.close();
        }
        drained
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("ids", &self.ids()).finish()
    }
}
