//! Convergence point for inbound telemetry.
//!
//! Every vehicle stream calls [`TelemetryBus::ingest`]; a single consumer
//! task ([`bus_loop`]) drains the queue into the [`Fanout`]. Ingestion never
//! waits: keep-alives are counted and discarded on the spot, and telemetry
//! that arrives while the queue is full is dropped.

use super::fanout::Fanout;
use crate::server::telemetry::{
    increment_heartbeats, increment_telemetry_dropped, increment_telemetry_ingested,
};
use portable_atomic::{AtomicU64, Ordering};
use scooter_core::types::TelemetryMessage;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    /// Keep-alive, consumed without forwarding.
    Heartbeat,
    /// Queue full or consumer gone.
    Dropped,
}

#[derive(Debug, Default)]
pub struct BusStats {
    pub accepted: AtomicU64,
    pub heartbeats: AtomicU64,
    pub dropped: AtomicU64,
}

/// Many-producer handle to the telemetry queue.
#[derive(Debug, Clone)]
pub struct TelemetryBus {
    tx: mpsc::Sender<TelemetryMessage>,
    stats: Arc<BusStats>,
}

impl TelemetryBus {
    /// Spawns the consumer task feeding `fanout`. It stops when `shutdown`
    /// is cancelled or every bus handle is dropped.
    pub fn spawn(buffer: usize, fanout: Fanout, shutdown: CancellationToken) -> Self {
        let (bus, rx) = Self::new(buffer);
        tokio::spawn(bus_loop(rx, fanout, shutdown));
        bus
    }

    fn new(buffer: usize) -> (Self, mpsc::Receiver<TelemetryMessage>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                tx,
                stats: Arc::new(BusStats::default()),
            },
            rx,
        )
    }

    pub fn ingest(&self, msg: TelemetryMessage) -> IngestOutcome {
        if msg.is_heartbeat() {
            self.stats.heartbeats.fetch_add(1, Ordering::Relaxed);
            increment_heartbeats();
            return IngestOutcome::Heartbeat;
        }

        match self.tx.try_send(msg) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                increment_telemetry_ingested();
                IngestOutcome::Accepted
            }
            Err(TrySendError::Full(msg)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                increment_telemetry_dropped();
                tracing::debug!(vehicle_id = msg.vehicle_id, "Telemetry bus full, message dropped");
                IngestOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                increment_telemetry_dropped();
                IngestOutcome::Dropped
            }
        }
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }
}

/// Drains the bus into the fanout until shutdown.
pub async fn bus_loop(
    mut rx: mpsc::Receiver<TelemetryMessage>,
    fanout: Fanout,
    shutdown: CancellationToken,
) {
    tracing::trace!("Telemetry bus started");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => {
                    let vehicle_id = msg.vehicle_id;
                    let delivered = fanout.publish(Arc::new(msg));
                    tracing::trace!(vehicle_id, delivered, "Telemetry fanned out");
                }
                None => break,
            },
        }
    }

    tracing::trace!("Telemetry bus stopped");
}
