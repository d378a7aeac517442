//! Registry of in-flight streaming requests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Tracks cancellation tokens of active streams by request id.
///
/// All operations take the same lock, so [`cancel_all`](Self::cancel_all)
/// is atomic with respect to concurrent `register` and `cancel` calls.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    active: Mutex<HashMap<String, CancellationToken>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: impl Into<String>, token: CancellationToken) {
        self.active.lock().insert(id.into(), token);
    }

    /// Fire the token for `id` and forget it. Returns false for unknown ids.
    pub fn cancel(&self, id: &str) -> bool {
        match self.active.lock().remove(id) {
            Some(token) => {
                token.cancel();
                debug!(request_id = id, "Cancelled request");
                true
            }
            None => false,
        }
    }

    /// Fire every tracked token and empty the registry. Returns how many
    /// requests were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut active = self.active.lock();
        let count = active.len();
        for (_, token) in active.drain() {
            token.cancel();
        }
        debug!(count, "Cancelled all requests");
        count
    }

    /// Forget `id` without firing its token.
    pub(crate) fn remove(&self, id: &str) -> bool {
        self.active.lock().remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.active.lock().contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.active.lock().len()
    }
}

/// Keeps a request registered for as long as it is alive.
///
/// Dropping the guard removes the id, so cleanup happens exactly once on
/// every exit path: completion, error, cancellation or an abandoned stream.
#[derive(Debug)]
pub(crate) struct Registration {
    registry: Arc<RequestRegistry>,
    id: String,
}

impl Registration {
    pub(crate) fn new(registry: Arc<RequestRegistry>, id: String, token: CancellationToken) -> Self {
        registry.register(id.clone(), token);
        Self { registry, id }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}
