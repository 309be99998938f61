//! `ActiveCheckRegistry` — the only in-memory state the engine keeps
//! (spec §3, §9). A mapping from file path to a cancellation handle, valid
//! only while a probe is in flight in this process.
//!
//! Grounded on `pipeline::processing_loop`'s `tokio_util::CancellationToken`
//! usage and spec §9's explicit strategy: "per-operation scoped cancellation
//! token stored in a keyed in-memory map, guarded by a mutex; token
//! invocation is idempotent."

use crate::error::HealthError;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// In-memory registry of in-flight checks, keyed by `file_path`.
#[derive(Default)]
pub struct ActiveCheckRegistry {
    entries: Mutex<HashMap<String, CancellationToken>>,
}

impl ActiveCheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a child token derived from `parent` for `file_path`.
    /// Fails with [`HealthError::AlreadyActive`] if an entry already exists.
    pub async fn register(
        &self,
        file_path: &str,
        parent: &CancellationToken,
    ) -> Result<CancellationToken, HealthError> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(file_path) {
            return Err(HealthError::AlreadyActive);
        }
        let child = parent.child_token();
        entries.insert(file_path.to_string(), child.clone());
        Ok(child)
    }

    /// Remove the entry for `file_path`, if any. Idempotent.
    pub async fn deregister(&self, file_path: &str) {
        self.entries.lock().await.remove(file_path);
    }

    /// Look up and cancel the active check for `file_path`, removing the
    /// entry. Fails with [`HealthError::NoActiveCheck`] if none exists.
    pub async fn cancel(&self, file_path: &str) -> Result<(), HealthError> {
        let mut entries = self.entries.lock().await;
        match entries.remove(file_path) {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(HealthError::NoActiveCheck),
        }
    }

    /// Whether a check is currently active for `file_path`.
    pub async fn is_active(&self, file_path: &str) -> bool {
        self.entries.lock().await.contains_key(file_path)
    }

    /// Number of currently active checks.
    pub async fn active_count(&self) -> usize {
        self.entries.lock().await.len()
    }
}
