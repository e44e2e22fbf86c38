//! Backend connection sequencing and health supervision.
//!
//! Candidates are tried once, in priority order, each attempt raced against
//! a timeout. A connected backend is then watched with periodic health
//! probes; the first failed probe hot-swaps the store onto the in-process
//! fallback. There is no automatic failback: once degraded, the process
//! stays on the fallback until restart.

use std::{sync::Arc, time::Duration};

use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::{
    config::StoreConfig,
    dao::session_store::{BackendKind, SessionBackend, redis::RedisSessionStore},
    state::SharedState,
};

const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Try every configured candidate once and return the first backend that
/// connects and answers the health probe.
pub(crate) async fn connect_distributed(config: &StoreConfig) -> Option<Arc<dyn SessionBackend>> {
    for target in &config.candidates {
        let attempt = RedisSessionStore::connect(config.redis_config(target));
        match timeout(config.connect_timeout, attempt).await {
            Ok(Ok(store)) => {
                info!(candidate = %target.label, "connected to distributed backend");
                return Some(Arc::new(store));
            }
            Ok(Err(err)) => {
                warn!(candidate = %target.label, error = %err, "backend candidate failed");
            }
            Err(_) => {
                warn!(candidate = %target.label, "backend candidate timed out");
            }
        }
    }

    None
}

/// Watch the distributed backend and swap to the fallback when it stops
/// answering health probes. Returns once the swap happened (or once the
/// store is no longer on a distributed backend).
pub(crate) async fn watch(state: SharedState) {
    loop {
        sleep(HEALTH_POLL_INTERVAL).await;

        let backend = state.backend().await;
        if backend.kind() != BackendKind::Distributed {
            return;
        }

        if let Err(err) = backend.health_check().await {
            warn!(error = %err, "distributed backend health check failed; entering degraded mode");
            state.activate_fallback().await;
            return;
        }
    }
}
