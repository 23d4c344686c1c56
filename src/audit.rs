//! Delivery-record producer.
//!
//! After a successful sink write the worker publishes one audit record,
//! wrapped in an envelope, onto a fixed topic. Publishing is best-effort:
//! a failure is logged by the caller and never blocks the offset commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::KafkaConfig;
use crate::content::EventKind;
use crate::envelope::{Envelope, MessageType};
use crate::AUDIT_TOPIC;

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from the audit producer.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("record encode error: {0}")]
    Encode(String),

    #[error("kafka produce error: {0}")]
    Produce(#[from] rdkafka::error::KafkaError),
}

/// One delivery, as published to the audit topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    #[serde(rename = "NodeID")]
    pub node_id: i64,

    #[serde(rename = "EventID")]
    pub event_id: i64,

    #[serde(rename = "EventType")]
    pub event_kind: EventKind,

    #[serde(rename = "ConsumerGroupID")]
    pub consumer_group: String,

    #[serde(rename = "FTPHost")]
    pub ftp_host: String,

    #[serde(rename = "FTPUsername")]
    pub ftp_username: String,

    #[serde(rename = "FTPPath")]
    pub ftp_path: String,

    #[serde(rename = "Filename")]
    pub filename: String,

    #[serde(rename = "SHA256Checksum")]
    pub sha256_checksum: String,

    /// UTC instant the sink write completed.
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,

    #[serde(rename = "SizeBytes")]
    pub size_bytes: usize,
}

/// Write-side of the audit trail.
#[async_trait]
pub trait AuditPublisher: Send + Sync {
    async fn publish(&self, record: &DeliveryRecord) -> Result<(), AuditError>;
}

/// Publishes envelopes onto the audit topic with LZ4 compression.
pub struct KafkaAuditPublisher {
    producer: FutureProducer,
}

impl KafkaAuditPublisher {
    pub fn new(kafka: &KafkaConfig) -> Result<Self, AuditError> {
        let mut client = kafka.client_config();
        client.set("compression.codec", "lz4");

        Ok(Self {
            producer: client.create()?,
        })
    }
}

#[async_trait]
impl AuditPublisher for KafkaAuditPublisher {
    async fn publish(&self, record: &DeliveryRecord) -> Result<(), AuditError> {
        let envelope = Envelope::wrap(MessageType::DeliveryRecord, record)
            .map_err(|e| AuditError::Encode(e.to_string()))?;
        let payload = envelope
            .to_bytes()
            .map_err(|e| AuditError::Encode(e.to_string()))?;

        self.producer
            .send(
                FutureRecord::<(), Vec<u8>>::to(AUDIT_TOPIC).payload(&payload),
                PUBLISH_TIMEOUT,
            )
            .await
            .map_err(|(e, _)| AuditError::Produce(e))?;

        debug!(
            envelope_id = %envelope.id,
            checksum = %record.sha256_checksum,
            size = record.size_bytes,
            "Delivery record sent"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> DeliveryRecord {
        DeliveryRecord {
            node_id: 13_719_500,
            event_id: 81,
            event_kind: EventKind::Created,
            consumer_group: "courier-test".to_string(),
            ftp_host: "ftp.example.com:21".to_string(),
            ftp_username: "courier".to_string(),
            ftp_path: "/inbound".to_string(),
            filename: "benzinga_13719500_1562943845_rss2.xml".to_string(),
            sha256_checksum: "deadbeef".to_string(),
            timestamp: Utc.with_ymd_and_hms(2019, 7, 12, 15, 4, 6).unwrap(),
            size_bytes: 2048,
        }
    }

    #[test]
    fn test_record_wire_names() {
        let value = serde_json::to_value(record()).unwrap();

        assert_eq!(value["NodeID"], 13_719_500);
        assert_eq!(value["EventID"], 81);
        assert_eq!(value["EventType"], "Created");
        assert_eq!(value["ConsumerGroupID"], "courier-test");
        assert_eq!(value["FTPHost"], "ftp.example.com:21");
        assert_eq!(value["FTPPath"], "/inbound");
        assert_eq!(value["Filename"], "benzinga_13719500_1562943845_rss2.xml");
        assert_eq!(value["SHA256Checksum"], "deadbeef");
        assert_eq!(value["SizeBytes"], 2048);
    }

    #[test]
    fn test_record_round_trips_inside_envelope() {
        let envelope = Envelope::wrap(MessageType::DeliveryRecord, &record()).unwrap();
        let decoded = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();

        assert_eq!(decoded.message_type, MessageType::DeliveryRecord);
        let inner: DeliveryRecord = serde_json::from_str(decoded.message.get()).unwrap();
        assert_eq!(inner.filename, record().filename);
        assert_eq!(inner.sha256_checksum, record().sha256_checksum);
        assert_eq!(inner.timestamp, record().timestamp);
    }
}
