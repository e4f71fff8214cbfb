//! Consumers of poll outcomes.

use std::future::Future;

use accelbus_common::session::put_encoded;
use accelbus_common::{Format, KeyExprBuilder, TelemetryPoint};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use zenoh::Session;

use crate::poller::{FatalReason, PollOutcome};
use crate::snapshot::DecodedSnapshot;
use crate::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The consumer is gone; the poller should stop.
    #[error("outcome sink closed")]
    Closed,
}

/// Receives the outcome of every poll cycle, in order.
pub trait PollSink: Send {
    fn emit(&mut self, outcome: PollOutcome) -> impl Future<Output = Result<(), SinkError>> + Send;
}

impl PollSink for Vec<PollOutcome> {
    async fn emit(&mut self, outcome: PollOutcome) -> Result<(), SinkError> {
        self.push(outcome);
        Ok(())
    }
}

impl PollSink for mpsc::Sender<PollOutcome> {
    async fn emit(&mut self, outcome: PollOutcome) -> Result<(), SinkError> {
        self.send(outcome).await.map_err(|_| SinkError::Closed)
    }
}

/// Writes every outcome to the log.
#[derive(Debug, Clone)]
pub struct LogSink {
    device: String,
}

impl LogSink {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl PollSink for LogSink {
    async fn emit(&mut self, outcome: PollOutcome) -> Result<(), SinkError> {
        match &outcome {
            PollOutcome::Snapshot(snapshot) => {
                for field in snapshot.values() {
                    info!(
                        device = %self.device,
                        field = %field.name,
                        value = %field.value,
                        unit = field.unit.as_deref().unwrap_or(""),
                        "Field value"
                    );
                }
                for e in snapshot.errors() {
                    warn!(device = %self.device, error = %e, "Field not decoded");
                }
            }
            PollOutcome::TransientError { reason, attempt } => {
                warn!(device = %self.device, attempt, error = %reason, "Poll failed");
            }
            PollOutcome::FatalError { reason } => {
                error!(device = %self.device, error = %reason, "Polling stopped");
            }
        }
        Ok(())
    }
}

/// Published on `<prefix>/<device>/@/error` for every failed cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Timestamp (millis since epoch).
    pub timestamp: i64,
    pub device: String,
    /// Short classification, e.g. `timeout` or `decode`.
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Whether the poller stopped because of this error.
    pub fatal: bool,
}

impl ErrorReport {
    pub fn transient(device: &str, reason: &TransportError, attempt: u32) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            device: device.to_string(),
            kind: reason.kind().to_string(),
            message: reason.to_string(),
            attempt: Some(attempt),
            fatal: false,
        }
    }

    pub fn fatal(device: &str, reason: &FatalReason) -> Self {
        let attempt = match reason {
            FatalReason::RetriesExhausted { attempts, .. } => Some(*attempts),
            FatalReason::NonTransient(_) => None,
        };
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            device: device.to_string(),
            kind: reason.transport_error().kind().to_string(),
            message: reason.to_string(),
            attempt,
            fatal: true,
        }
    }

    fn decode(device: &str, snapshot: &DecodedSnapshot) -> Option<Self> {
        if snapshot.is_complete() {
            return None;
        }
        let message = snapshot
            .errors()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Some(Self {
            timestamp: snapshot.acquired_at().timestamp_millis(),
            device: device.to_string(),
            kind: "decode".to_string(),
            message,
            attempt: None,
            fatal: false,
        })
    }
}

/// One telemetry point per decoded field of `snapshot`.
pub fn snapshot_points(device: &str, snapshot: &DecodedSnapshot) -> Vec<TelemetryPoint> {
    let timestamp = snapshot.acquired_at().timestamp_millis();
    let space = snapshot.space().as_str();

    snapshot
        .values()
        .iter()
        .map(|field| {
            let mut point = TelemetryPoint::new(
                device,
                format!("{}/{}", space, field.name),
                field.value.to_telemetry(),
            )
            .at(timestamp)
            .with_label("address", field.address.to_string())
            .with_label("space", space)
            .with_label("map", snapshot.map_name());
            if let Some(unit) = &field.unit {
                point = point.with_label("unit", unit.clone());
            }
            point
        })
        .collect()
}

/// Publishes decoded fields and poll errors to Zenoh.
///
/// Publish failures are logged and never stop the poller.
pub struct ZenohSink {
    session: Session,
    keys: KeyExprBuilder,
    device: String,
    format: Format,
}

impl ZenohSink {
    pub fn new(
        session: Session,
        keys: KeyExprBuilder,
        device: impl Into<String>,
        format: Format,
    ) -> Self {
        Self {
            session,
            keys,
            device: device.into(),
            format,
        }
    }

    async fn publish_report(&self, report: &ErrorReport) {
        let key = self.keys.error(&self.device);
        if let Err(e) = put_encoded(&self.session, &key, report, self.format).await {
            warn!(device = %self.device, error = %e, "Failed to publish error report");
        }
    }

    async fn publish_snapshot(&self, snapshot: &DecodedSnapshot) {
        let space = snapshot.space().as_str();
        let mut published = 0usize;

        for (field, point) in snapshot
            .values()
            .iter()
            .zip(snapshot_points(&self.device, snapshot))
        {
            let key = self.keys.field(&self.device, space, &field.name);
            match put_encoded(&self.session, &key, &point, self.format).await {
                Ok(()) => published += 1,
                Err(e) => warn!(key = %key, error = %e, "Failed to publish field"),
            }
        }
        debug!(device = %self.device, published, "Published snapshot");

        if let Some(report) = ErrorReport::decode(&self.device, snapshot) {
            self.publish_report(&report).await;
        }
    }
}

impl PollSink for ZenohSink {
    async fn emit(&mut self, outcome: PollOutcome) -> Result<(), SinkError> {
        match &outcome {
            PollOutcome::Snapshot(snapshot) => self.publish_snapshot(snapshot).await,
            PollOutcome::TransientError { reason, attempt } => {
                let report = ErrorReport::transient(&self.device, reason, *attempt);
                self.publish_report(&report).await;
            }
            PollOutcome::FatalError { reason } => {
                let report = ErrorReport::fatal(&self.device, reason);
                self.publish_report(&report).await;
            }
        }
        Ok(())
    }
}

/// The sink a configured device publishes to.
pub enum BridgeSink {
    Log(LogSink),
    Zenoh(ZenohSink),
}

impl PollSink for BridgeSink {
    async fn emit(&mut self, outcome: PollOutcome) -> Result<(), SinkError> {
        match self {
            BridgeSink::Log(sink) => sink.emit(outcome).await,
            BridgeSink::Zenoh(sink) => sink.emit(outcome).await,
        }
    }
}
