//! Auth-state listeners.
//!
//! Callbacks are held in a registry shared with the provider. Each
//! registration returns an [`AuthStateListener`] handle; dropping it (or
//! calling [`AuthStateListener::unsubscribe`]) removes the callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::types::User;

/// Callback invoked with the signed-in user, or `None` when signed out.
pub type AuthCallback = Arc<dyn Fn(Option<&User>) + Send + Sync>;

/// Registered callbacks keyed by registration id.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, AuthCallback)>>,
}

impl ListenerRegistry {
    /// Empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `callback` and return its handle.
    pub fn register(self: &Arc<Self>, callback: AuthCallback) -> AuthStateListener {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.lock().push((id, callback));
        AuthStateListener {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Invoke every callback with `user`.
    ///
    /// Callbacks run outside the registry lock so they may register or
    /// unregister listeners themselves.
    pub fn notify(&self, user: Option<&User>) {
        let callbacks: Vec<AuthCallback> = self
            .callbacks
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(user);
        }
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Whether no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        self.callbacks.lock().retain(|(entry, _)| *entry != id);
    }
}

/// Handle for one registered callback. Unregisters on drop.
#[must_use = "dropping the listener unregisters the callback"]
pub struct AuthStateListener {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl AuthStateListener {
    /// Unregister explicitly.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for AuthStateListener {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for AuthStateListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthStateListener").field("id", &self.id).finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
