//! Shared store state: the active backend slot and the degraded-mode flag.

use std::{sync::Arc, time::Duration};

use tokio::sync::{RwLock, watch};
use tracing::warn;

use crate::dao::session_store::{BackendKind, SessionBackend, memory::MemorySessionStore};

/// Cheaply cloneable handle onto the shared store state.
pub type SharedState = Arc<StoreState>;

/// Central state shared by every operation of the store.
///
/// Exactly one backend is active at a time; the fallback instance is built
/// at startup and kept alive for the whole process, so any state written to
/// it survives later swaps back onto it.
pub struct StoreState {
    backend: RwLock<Arc<dyn SessionBackend>>,
    fallback: Arc<MemorySessionStore>,
    degraded: watch::Sender<bool>,
}

impl StoreState {
    /// Construct the shared state, starting on the in-process fallback
    /// until a distributed backend is installed.
    pub fn new(session_ttl: Duration) -> SharedState {
        let fallback = Arc::new(MemorySessionStore::new(session_ttl));
        let (degraded, _rx) = watch::channel(true);
        Arc::new(Self {
            backend: RwLock::new(fallback.clone() as Arc<dyn SessionBackend>),
            fallback,
            degraded,
        })
    }

    /// Handle onto the backend currently serving operations.
    pub async fn backend(&self) -> Arc<dyn SessionBackend> {
        self.backend.read().await.clone()
    }

    /// Install a connected distributed backend and leave degraded mode.
    pub async fn install_distributed(&self, store: Arc<dyn SessionBackend>) {
        {
            let mut guard = self.backend.write().await;
            *guard = store;
        }
        let _ = self.degraded.send(false);
    }

    /// Hot-swap onto the in-process fallback and enter degraded mode.
    ///
    /// Idempotent: swapping while already on the fallback just returns the
    /// current handle, so racing failure paths cannot double-log.
    pub async fn activate_fallback(&self) -> Arc<dyn SessionBackend> {
        let mut guard = self.backend.write().await;
        if guard.kind() == BackendKind::InProcess {
            return guard.clone();
        }

        warn!("switching to in-process fallback; cross-process fan-out disabled");
        *guard = self.fallback.clone() as Arc<dyn SessionBackend>;
        let _ = self.degraded.send(true);
        guard.clone()
    }

    /// Whether the store is currently running degraded (fallback mode).
    pub async fn is_degraded(&self) -> bool {
        self.backend.read().await.kind() == BackendKind::InProcess
    }

    /// Subscribe to degraded-mode changes.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }
}
