//! # Session Registry
//!
//! Process-wide bookkeeping of active bridges. Every bridge registers itself when it
//! starts and removes itself during teardown, so the registry always reflects exactly
//! the bridges that are still relaying.
//!
//! ## Key Features:
//! - **Capacity limit**: Refuses new bridges once `max_bridges` are active
//! - **Lifecycle accounting**: `count()` and `snapshot()` feed the health endpoints
//! - **Bulk shutdown**: `close_all()` tears every bridge down at process exit

use crate::error::BridgeSetupError;
use crate::relay::bridge::{BridgeControl, TeardownReason};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Public description of one active bridge.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeInfo {
    pub bridge_id: String,
    pub client_session: String,
    pub upstream_session: String,
    pub started_at: DateTime<Utc>,
}

/// Tracks active bridges.
///
/// ## Thread Safety:
/// Cloning is cheap (one `Arc`). The map sits behind a `RwLock` that is only held
/// for the map operation itself, never across an `.await` and never while a
/// bridge is being torn down.
#[derive(Clone)]
pub struct SessionRegistry {
    /// Active bridges indexed by bridge id
    bridges: Arc<RwLock<HashMap<String, Arc<BridgeControl>>>>,

    /// Maximum number of simultaneously active bridges (None = unlimited)
    max_bridges: Option<usize>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl SessionRegistry {
    /// Registry that refuses bridges beyond `max_bridges`.
    pub fn with_capacity(max_bridges: usize) -> Self {
        Self {
            bridges: Arc::new(RwLock::new(HashMap::new())),
            max_bridges: Some(max_bridges),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            bridges: Arc::new(RwLock::new(HashMap::new())),
            max_bridges: None,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<BridgeControl>>> {
        self.bridges.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<BridgeControl>>> {
        self.bridges.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a bridge.
    ///
    /// ## Returns:
    /// - **Ok(())**: Registered
    /// - **Err(AtCapacity)**: The limit is reached; the check and the insert happen
    ///   under the same write lock, so concurrent starts cannot overshoot it
    /// - **Err(DuplicateBridge)**: The id is already present
    pub fn register(&self, bridge: Arc<BridgeControl>) -> Result<(), BridgeSetupError> {
        let mut bridges = self.write();

        if let Some(max) = self.max_bridges {
            if bridges.len() >= max {
                return Err(BridgeSetupError::AtCapacity { max });
            }
        }

        let id = bridge.id().to_string();
        if bridges.contains_key(&id) {
            return Err(BridgeSetupError::DuplicateBridge(id));
        }

        bridges.insert(id.clone(), bridge);
        debug!(bridge_id = %id, active = bridges.len(), "Bridge registered");
        Ok(())
    }

    /// Remove a bridge. Returns `false` if it was not registered.
    pub fn unregister(&self, bridge_id: &str) -> bool {
        let mut bridges = self.write();
        let removed = bridges.remove(bridge_id).is_some();
        if removed {
            debug!(bridge_id = %bridge_id, active = bridges.len(), "Bridge unregistered");
        }
        removed
    }

    /// Number of active bridges.
    pub fn count(&self) -> usize {
        self.read().len()
    }

    pub fn contains(&self, bridge_id: &str) -> bool {
        self.read().contains_key(bridge_id)
    }

    pub fn max_bridges(&self) -> Option<usize> {
        self.max_bridges
    }

    /// Whether one more bridge would currently fit.
    pub fn has_capacity(&self) -> bool {
        match self.max_bridges {
            Some(max) => self.count() < max,
            None => true,
        }
    }

    /// Descriptions of every active bridge, oldest first.
    pub fn snapshot(&self) -> Vec<BridgeInfo> {
        let mut infos: Vec<BridgeInfo> = self.read().values().map(|bridge| bridge.info().clone()).collect();
        infos.sort_by_key(|info| info.started_at);
        infos
    }

    /// Tear down every active bridge. Returns how many were closed by this call.
    ///
    /// ## Locking:
    /// Teardown unregisters each bridge, which takes the write lock, so the
    /// controls are collected first and the lock released before closing them.
    ///
    /// ## Rust Concepts:
    /// - **.cloned().collect()**: Copies the `Arc`s out of the map; the temporary
    ///   read guard is dropped at the end of that statement
    /// - **.filter(..).count()**: Bridges already torn down by their own pumps
    ///   return `false` from `teardown` and are not counted
    pub fn close_all(&self) -> usize {
        let bridges: Vec<Arc<BridgeControl>> = self.read().values().cloned().collect();
        let closed = bridges
            .iter()
            .filter(|bridge| bridge.teardown(TeardownReason::Shutdown))
            .count();

        info!(closed, "Closed all active bridges");
        closed
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("active", &self.count())
            .field("max_bridges", &self.max_bridges)
            .finish()
    }
}
