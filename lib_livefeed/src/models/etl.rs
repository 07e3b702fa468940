//! # ETL Performance Wire Types
//!
//! The live ETL performance endpoint sends, per batch, a list of tasks.
//! Each task carries its transformations and each transformation carries
//! the performance records produced since the previous batch:
//!
//! ```text
//! EtlTaskPerformanceStats (TaskKind, TaskName, TaskSubKind)
//!   └── EtlProcessPerformanceStats (TransformationName)
//!         └── EtlPerformanceStats (Id, Started, Completed, counters…)
//! ```
//!
//! A record still in progress may be resent with the same `Id` and fresher
//! counters until it completes.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// One ETL task and the records it produced in this batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EtlTaskPerformanceStats {
    /// Server-side task id.
    #[serde(default)]
    pub task_id: i64,
    /// Task name, unique per kind.
    pub task_name: String,
    /// Task kind, e.g. `Raven`, `Sql`, `Olap`, `ElasticSearch`, `Queue`.
    pub etl_type: String,
    /// Task sub-kind, e.g. the queue broker (`Kafka`, `RabbitMq`).
    #[serde(default)]
    pub etl_sub_type: Option<String>,
    /// Per-transformation records.
    #[serde(default)]
    pub stats: Vec<EtlProcessPerformanceStats>,
}

/// One transformation script and its records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EtlProcessPerformanceStats {
    /// Transformation name, unique within a task.
    pub transformation_name: String,
    /// Records in server order.
    #[serde(default)]
    pub performance: Vec<EtlPerformanceStats>,
}

/// A single ETL batch run as reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EtlPerformanceStats {
    /// Monotonically increasing id, unique within a transformation.
    pub id: i64,
    /// Start time, ISO 8601.
    pub started: String,
    /// Completion time; absent while the batch is still running.
    #[serde(default)]
    pub completed: Option<String>,
    /// Elapsed time so far.
    #[serde(default)]
    pub duration_in_ms: f64,
    /// Items extracted, by item type.
    #[serde(default)]
    pub number_of_extracted_items: BTreeMap<String, i64>,
    /// Items transformed, by item type.
    #[serde(default)]
    pub number_of_transformed_items: BTreeMap<String, i64>,
    /// Items loaded into the destination.
    #[serde(default)]
    pub number_of_loaded_items: i64,
    /// Transformation script errors in this batch.
    #[serde(default)]
    pub transformation_error_count: i64,
    /// `Some(false)` when the load phase failed.
    #[serde(default)]
    pub successfully_loaded: Option<bool>,
    /// Why the transformation phase stopped, if it stopped early.
    #[serde(default)]
    pub batch_transformation_complete_reason: Option<String>,
    /// Why the batch stopped, if it stopped early.
    #[serde(default)]
    pub batch_stop_reason: Option<String>,
    /// Nested operation timings.
    #[serde(default)]
    pub details: Option<EtlPerformanceOperation>,
}

/// A timed step inside an ETL batch; steps nest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EtlPerformanceOperation {
    /// Step name, e.g. `Extract`, `Transform`, `Load`.
    pub name: String,
    /// Step duration.
    #[serde(default)]
    pub duration_in_ms: f64,
    /// Child steps.
    #[serde(default)]
    pub operations: Vec<EtlPerformanceOperation>,
}

/// The ETL type label used by the studio views, derived from the task kind
/// and, for queue tasks, the broker sub-kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StudioEtlType {
    /// RavenDB to RavenDB.
    Raven,
    /// Relational database.
    Sql,
    /// Parquet files for OLAP.
    Olap,
    /// Elasticsearch.
    ElasticSearch,
    /// Kafka queue.
    Kafka,
    /// RabbitMQ queue.
    RabbitMq,
    /// Azure Queue Storage.
    AzureQueueStorage,
    /// Amazon SQS.
    AmazonSqs,
    /// Snowflake warehouse.
    Snowflake,
    /// A kind this client does not know yet.
    Other(String),
}

impl StudioEtlType {
    /// Derives the label. Unknown kinds and unknown queue brokers fall back
    /// to `Other`, keyed by the broker when there is one.
    pub fn derive(kind: &str, sub_kind: Option<&str>) -> Self {
        match kind {
            "Raven" => StudioEtlType::Raven,
            "Sql" => StudioEtlType::Sql,
            "Olap" => StudioEtlType::Olap,
            "ElasticSearch" => StudioEtlType::ElasticSearch,
            "Snowflake" => StudioEtlType::Snowflake,
            "Queue" => match sub_kind {
                Some("Kafka") => StudioEtlType::Kafka,
                Some("RabbitMq") => StudioEtlType::RabbitMq,
                Some("AzureQueueStorage") => StudioEtlType::AzureQueueStorage,
                Some("AmazonSqs") => StudioEtlType::AmazonSqs,
                Some(broker) => StudioEtlType::Other(broker.to_string()),
                None => StudioEtlType::Other(kind.to_string()),
            },
            other => StudioEtlType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for StudioEtlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StudioEtlType::Raven => "Raven",
            StudioEtlType::Sql => "Sql",
            StudioEtlType::Olap => "Olap",
            StudioEtlType::ElasticSearch => "ElasticSearch",
            StudioEtlType::Kafka => "Kafka",
            StudioEtlType::RabbitMq => "RabbitMQ",
            StudioEtlType::AzureQueueStorage => "AzureQueueStorage",
            StudioEtlType::AmazonSqs => "AmazonSqs",
            StudioEtlType::Snowflake => "Snowflake",
            StudioEtlType::Other(kind) => kind.as_str(),
        };
        f.write_str(label)
    }
}

/// Parses a server timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_server_timestamps() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-01T10:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T10:00:00.0000000Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T10:00:00.0000000"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T12:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn studio_type_uses_sub_kind_for_queues() {
        assert_eq!(StudioEtlType::derive("Raven", None), StudioEtlType::Raven);
        assert_eq!(StudioEtlType::derive("Queue", Some("Kafka")), StudioEtlType::Kafka);
        assert_eq!(StudioEtlType::derive("Queue", None), StudioEtlType::Other("Queue".to_string()));
        assert_eq!(
            StudioEtlType::derive("Queue", Some("Pigeon")),
            StudioEtlType::Other("Pigeon".to_string())
        );
        assert_eq!(StudioEtlType::derive("Custom", None), StudioEtlType::Other("Custom".to_string()));
    }

    #[test]
    fn task_stats_deserialize_with_defaults() {
        let json = r#"{
            "TaskName": "Task1",
            "EtlType": "Raven",
            "Stats": [{
                "TransformationName": "T1",
                "Performance": [{ "Id": 1, "Started": "2024-03-01T10:00:00Z" }]
            }]
        }"#;
        let stats: EtlTaskPerformanceStats = serde_json::from_str(json).unwrap();
        assert_eq!(stats.etl_sub_type, None);
        let record = &stats.stats[0].performance[0];
        assert_eq!(record.id, 1);
        assert_eq!(record.completed, None);
        assert_eq!(record.successfully_loaded, None);
    }
}
