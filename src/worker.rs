//! The delivery worker.
//!
//! A single sequential loop over the Kafka reader. Each handle moves
//! through fetch, decode, filter, transform, send, audit, commit, in that
//! order. Offsets only advance for delivered or intentionally rejected
//! handles; decode, transform, and send failures leave the offset alone so
//! the handle is redelivered.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Message};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::audit::{AuditPublisher, DeliveryRecord};
use crate::config::Config;
use crate::content::{Event, EventKind};
use crate::envelope::{Envelope, MessageType};
use crate::metrics::Collector;
use crate::shutdown::ShutdownSignal;
use crate::sink::{Sink, SinkError};
use crate::transform::{ContentClass, Transform};

/// Errors that terminate the worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("kafka consumer error: {0}")]
    Consumer(#[from] KafkaError),

    #[error("sink failure: {0}")]
    Sink(#[from] SinkError),
}

/// Why a well-formed handle was dropped on purpose. Rejected handles are
/// committed so they never block partition progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidEnvelopeMessageType,
    UpdatedBeforeIgnoreValue,
    UnwantedContentType,
    UnwantedEventType,
}

impl RejectReason {
    pub fn as_label(&self) -> &'static str {
        match self {
            RejectReason::InvalidEnvelopeMessageType => "invalid_envelope_message_type",
            RejectReason::UpdatedBeforeIgnoreValue => "updated_before_ignore_value",
            RejectReason::UnwantedContentType => "unwanted_content_type",
            RejectReason::UnwantedEventType => "unwanted_event_type",
        }
    }
}

/// What the loop should do with the current handle.
#[derive(Debug)]
pub enum Disposition {
    /// Sent and audited; commit.
    Delivered,
    /// Filtered out; commit with a labeled reason.
    Rejected(RejectReason),
    /// Malformed payload; leave uncommitted, count a receive error.
    ReceiveFailed,
    /// Transform or send failed; leave uncommitted, count a send error.
    SendFailed,
    /// The sink session is gone for good; stop the worker.
    Fatal(SinkError),
}

/// The update-time filter predicate.
///
/// An event is rejected when its content was last updated before the
/// configured instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cutoff(pub DateTime<Utc>);

impl Cutoff {
    pub fn rejects(&self, updated_at: DateTime<Utc>) -> bool {
        updated_at < self.0
    }
}

/// Static settings the per-message pipeline needs.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub consumer_group: String,
    pub accepted_kinds: Vec<EventKind>,
    pub cutoff: Option<Cutoff>,
    pub ftp_host: String,
    pub ftp_username: String,
    pub ftp_path: String,
}

/// The per-message half of the worker: everything between a fetched
/// payload and the commit decision.
pub struct Pipeline<T, S, A> {
    transform: T,
    sink: Arc<S>,
    audit: A,
    settings: PipelineSettings,
}

impl<T: Transform, S: Sink, A: AuditPublisher> Pipeline<T, S, A> {
    pub fn new(transform: T, sink: Arc<S>, audit: A, settings: PipelineSettings) -> Self {
        Self {
            transform,
            sink,
            audit,
            settings,
        }
    }

    pub async fn process(&self, payload: &[u8]) -> Disposition {
        let envelope = match Envelope::from_bytes(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, "Envelope decode error");
                return Disposition::ReceiveFailed;
            }
        };

        if envelope.message_type != MessageType::ContentEvent {
            error!(
                envelope_id = %envelope.id,
                message_type = envelope.message_type.as_str(),
                "Invalid message type"
            );
            return Disposition::Rejected(RejectReason::InvalidEnvelopeMessageType);
        }

        let event: Event = match serde_json::from_str(envelope.message.get()) {
            Ok(event) => event,
            Err(e) => {
                error!(envelope_id = %envelope.id, error = %e, "Event decode error");
                return Disposition::ReceiveFailed;
            }
        };

        debug!(
            envelope_id = %envelope.id,
            event_id = event.id,
            node_id = event.node_id,
            "Event decoded"
        );

        if let Some(cutoff) = &self.settings.cutoff {
            if cutoff.rejects(event.content.updated_at) {
                info!(
                    node_id = event.node_id,
                    updated_at = %event.content.updated_at,
                    ignore_before = %cutoff.0,
                    "Ignoring event, updated before cutoff"
                );
                return Disposition::Rejected(RejectReason::UpdatedBeforeIgnoreValue);
            }
        }

        if ContentClass::from_type(&event.content.content_type).is_none() {
            info!(
                node_id = event.node_id,
                content_type = %event.content.content_type,
                "Ignoring event, unwanted content type"
            );
            return Disposition::Rejected(RejectReason::UnwantedContentType);
        }

        if !self.settings.accepted_kinds.contains(&event.kind) {
            debug!(
                node_id = event.node_id,
                event_kind = event.kind.as_str(),
                "Ignoring event, unwanted event kind"
            );
            return Disposition::Rejected(RejectReason::UnwantedEventType);
        }

        let artifact = match self.transform.convert(&event).await {
            Ok(artifact) => artifact,
            Err(e) => {
                error!(node_id = event.node_id, error = %e, "Transform error");
                return Disposition::SendFailed;
            }
        };

        if let Err(e) = self.sink.send(&artifact).await {
            if e.is_fatal() {
                return Disposition::Fatal(e);
            }
            error!(node_id = event.node_id, filename = %artifact.filename(), error = %e, "Send error");
            return Disposition::SendFailed;
        }

        let record = DeliveryRecord {
            node_id: event.node_id,
            event_id: event.id,
            event_kind: event.kind,
            consumer_group: self.settings.consumer_group.clone(),
            ftp_host: self.settings.ftp_host.clone(),
            ftp_username: self.settings.ftp_username.clone(),
            ftp_path: self.settings.ftp_path.clone(),
            filename: artifact.filename().to_string(),
            sha256_checksum: artifact.checksum().to_string(),
            timestamp: Utc::now(),
            size_bytes: artifact.size(),
        };

        // A failed audit publish is logged but never holds back the commit.
        if let Err(e) = self.audit.publish(&record).await {
            error!(node_id = event.node_id, error = %e, "Record delivery error");
        }

        Disposition::Delivered
    }
}

/// The Kafka-facing worker: owns the consumer and drives the pipeline.
pub struct DeliveryWorker<T, S, A> {
    pipeline: Pipeline<T, S, A>,
    consumer: StreamConsumer,
    metrics: Arc<Collector>,
    group_id: String,
    topic: String,
}

impl<T: Transform, S: Sink, A: AuditPublisher> DeliveryWorker<T, S, A> {
    pub fn new(
        cfg: &Config,
        pipeline: Pipeline<T, S, A>,
        metrics: Arc<Collector>,
    ) -> Result<Self, WorkerError> {
        let mut client = cfg.kafka.client_config();
        client
            .set("group.id", &cfg.kafka.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", "earliest")
            .set("heartbeat.interval.ms", "2000")
            .set("fetch.wait.max.ms", "10000")
            .set("fetch.min.bytes", "10000")
            .set("fetch.max.bytes", "100000000");

        let consumer: StreamConsumer = client.create()?;
        consumer.subscribe(&[cfg.kafka.topic.as_str()])?;

        Ok(Self {
            pipeline,
            consumer,
            metrics,
            group_id: cfg.kafka.group_id.clone(),
            topic: cfg.kafka.topic.clone(),
        })
    }

    /// Consume until shutdown or a fatal error.
    pub async fn run(&self, shutdown: &ShutdownSignal) -> Result<(), WorkerError> {
        let mut shutdown_rx = shutdown.subscribe();

        info!(topic = %self.topic, group_id = %self.group_id, "Waiting for new content");

        loop {
            let msg = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown received, stopping consumption");
                    break;
                }
                res = self.consumer.recv() => match res {
                    Ok(msg) => msg,
                    Err(e) if is_fatal_consumer_error(&e) => {
                        error!(error = %e, "Kafka reader closed");
                        return Err(WorkerError::Consumer(e));
                    }
                    Err(e) => {
                        error!(error = %e, "Fetch message error");
                        self.metrics.inc_receive_errors();
                        continue;
                    }
                },
            };

            let started = Instant::now();
            self.metrics.inc_accepted();

            debug!(
                topic = %self.topic,
                partition = msg.partition(),
                offset = msg.offset(),
                "Kafka message received"
            );

            let payload = msg.payload().unwrap_or_default();

            // A shutdown mid-delivery drops the handle uncommitted; it is
            // redelivered on restart.
            let disposition = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown received mid-delivery, handle left uncommitted");
                    break;
                }
                disposition = self.pipeline.process(payload) => disposition,
            };

            match disposition {
                Disposition::Delivered => {
                    self.metrics.inc_sent();
                    self.commit(&msg, started);
                }
                Disposition::Rejected(reason) => {
                    self.metrics.inc_rejected(reason.as_label());
                    self.commit(&msg, started);
                }
                Disposition::ReceiveFailed => self.metrics.inc_receive_errors(),
                Disposition::SendFailed => self.metrics.inc_send_errors(),
                Disposition::Fatal(e) => {
                    error!(error = %e, "Sink session unrecoverable");
                    return Err(WorkerError::Sink(e));
                }
            }
        }

        Ok(())
    }

    fn commit(&self, msg: &BorrowedMessage<'_>, started: Instant) {
        if let Err(e) = self.consumer.commit_message(msg, CommitMode::Sync) {
            error!(offset = msg.offset(), error = %e, "Kafka commit error");
        }
        self.metrics.inc_acknowledged();
        self.metrics.observe_latency(started.elapsed());
        debug!(
            offset = msg.offset(),
            total_latency_ms = started.elapsed().as_millis() as u64,
            "Message commit success"
        );
    }
}

fn is_fatal_consumer_error(e: &KafkaError) -> bool {
    matches!(e, KafkaError::MessageConsumption(RDKafkaErrorCode::Fatal))
}
