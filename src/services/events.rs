//! Broadcast bus: session-scoped event fan-out across worker processes.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::debug;

use crate::{
    dao::models::{Opaque, SessionEvent},
    error::StoreError,
    services::store::LiveSessionStore,
};

/// Live subscription to one session's event channel.
///
/// Dropping the handle cancels the subscription. Slow consumers that fall
/// behind the channel capacity skip the overwritten events and keep
/// receiving from the oldest retained one.
pub struct SessionSubscription {
    code: String,
    inner: BroadcastStream<SessionEvent>,
}

impl SessionSubscription {
    /// Session code this subscription is scoped to.
    pub fn session_code(&self) -> &str {
        &self.code
    }

    /// Wait for the next event; `None` once the channel is closed.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        use tokio_stream::StreamExt;

        loop {
            match self.inner.next().await {
                Some(Ok(event)) => return Some(event),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    debug!(code = %self.code, skipped, "subscriber lagged; events dropped");
                }
                None => return None,
            }
        }
    }
}

impl Stream for SessionSubscription {
    type Item = Result<SessionEvent, BroadcastStreamRecvError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl LiveSessionStore {
    /// Fan an event out to every process subscribed to the session channel.
    ///
    /// In fallback mode there are no sibling processes to notify and this
    /// is a documented no-op: cross-process live updates are unavailable
    /// while degraded.
    pub async fn publish_to_session(
        &self,
        code: &str,
        event: impl Into<String>,
        data: Opaque,
    ) -> Result<(), StoreError> {
        let event = SessionEvent {
            event: event.into(),
            data,
        };

        if self.is_degraded().await {
            debug!(%code, event = %event.event, "fallback mode; session event dropped");
            return Ok(());
        }

        self.with_backend(|backend| backend.publish(code, event.clone()))
            .await
    }

    /// Subscribe to a session's event channel.
    ///
    /// Returns `None` in fallback mode, where the bus is unavailable.
    pub async fn subscribe_to_session(
        &self,
        code: &str,
    ) -> Result<Option<SessionSubscription>, StoreError> {
        let receiver = self
            .with_backend(|backend| backend.subscribe(code))
            .await?;

        Ok(receiver.map(|receiver| SessionSubscription {
            code: code.to_owned(),
            inner: BroadcastStream::new(receiver),
        }))
    }
}
