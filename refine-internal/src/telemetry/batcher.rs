//! Usage recorder - moves telemetry writes off the request path
//!
//! The recorder uses an actor pattern with a tokio mpsc channel:
//! - Request handlers hand events over with `try_send()` (fire-and-forget)
//! - A background task writes each event to the configured sink
//!
//! A full or closed channel never blocks a request. The event is written to
//! the log instead so it is not lost silently.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{log_event, TelemetrySink, UsageEvent};

/// Default channel buffer size (max pending events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct UsageRecorder {
    tx: mpsc::Sender<UsageEvent>,
}

impl UsageRecorder {
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self::with_capacity(sink, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(sink: Arc<dyn TelemetrySink>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(Self::writer(rx, sink));
        Self { tx }
    }

    /// Queue an event without blocking.
    pub fn try_send(&self, event: UsageEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {
                debug!("Usage event queued");
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Usage recorder channel full, logging event instead");
                log_event(&event);
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                error!("Usage recorder channel closed, logging event instead");
                log_event(&event);
            }
        }
    }

    async fn writer(mut rx: mpsc::Receiver<UsageEvent>, sink: Arc<dyn TelemetrySink>) {
        info!("Usage recorder started");
        while let Some(event) = rx.recv().await {
            if let Err(e) = sink.record(&event).await {
                // The sink already logged the failure; keep the event itself.
                warn!(request_id = %event.request_id, "Failed to persist usage event: {e}");
                log_event(&event);
            }
        }
        info!("Usage recorder stopped");
    }
}
