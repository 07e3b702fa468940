//! # ETL Performance Merge Engine
//!
//! Folds successive live ETL batches into a three-level tree:
//!
//! 1. `TaskGroup`, keyed by (kind, name, sub-kind),
//! 2. `TransformationGroup`, keyed by transformation name within a task,
//! 3. `PerformanceRecord`, keyed by the server-assigned record id.
//!
//! Groups keep insertion order and are never removed. Records are appended
//! in server order, except that a record whose id is already present is
//! replaced in place; the server resends a running batch with fresher
//! counters until it completes. Derived fields are computed on every
//! ingestion of a record and cached on it.
//!
//! A record that started at or before the cutoff is dropped at ingestion.
//! The cutoff is fixed when the engine is built.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::core::merge::{MergeEngine, MergeError, TabularView};
use crate::models::etl::{parse_timestamp, EtlPerformanceStats, EtlTaskPerformanceStats, StudioEtlType};

/// Identity of a task group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskGroupKey {
    /// Task kind, e.g. `Raven`.
    pub kind: String,
    /// Task name.
    pub name: String,
    /// Task sub-kind, empty when the task has none.
    pub sub_kind: String,
}

impl TaskGroupKey {
    /// Builds a key from its three parts.
    pub fn new(kind: impl Into<String>, name: impl Into<String>, sub_kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            sub_kind: sub_kind.into(),
        }
    }

    fn of(stats: &EtlTaskPerformanceStats) -> Self {
        Self::new(
            stats.etl_type.clone(),
            stats.task_name.clone(),
            stats.etl_sub_type.clone().unwrap_or_default(),
        )
    }
}

/// A performance record with its derived fields.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceRecord {
    /// The record as the server sent it.
    pub stats: EtlPerformanceStats,
    /// Parsed `Started`.
    pub started_at: DateTime<Utc>,
    /// Parsed `Completed`, `None` while running.
    pub completed_at: Option<DateTime<Utc>>,
    /// The load phase reported failure.
    pub has_load_errors: bool,
    /// The transformation script reported errors.
    pub has_transform_errors: bool,
    /// Either of the above.
    pub has_errors: bool,
    /// Studio label for the owning task.
    pub studio_type: StudioEtlType,
}

impl PerformanceRecord {
    /// Computes the derived fields for `stats`.
    pub fn derive(stats: EtlPerformanceStats, studio_type: &StudioEtlType) -> Result<Self, MergeError> {
        let started_at = parse_timestamp(&stats.started).ok_or_else(|| MergeError::InvalidTimestamp {
            field: "Started",
            value: stats.started.clone(),
        })?;

        let completed_at = match stats.completed.as_deref() {
            Some(value) => Some(parse_timestamp(value).ok_or_else(|| MergeError::InvalidTimestamp {
                field: "Completed",
                value: value.to_string(),
            })?),
            None => None,
        };

        let has_load_errors = stats.successfully_loaded == Some(false);
        let has_transform_errors = stats.transformation_error_count > 0;

        Ok(Self {
            stats,
            started_at,
            completed_at,
            has_load_errors,
            has_transform_errors,
            has_errors: has_load_errors || has_transform_errors,
            studio_type: studio_type.clone(),
        })
    }

    /// Server-assigned record id.
    pub fn id(&self) -> i64 {
        self.stats.id
    }

    /// True once the server has reported a completion time.
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Records of one transformation, in server order.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformationGroup {
    name: String,
    records: Vec<PerformanceRecord>,
}

impl TransformationGroup {
    fn new(name: String) -> Self {
        Self {
            name,
            records: Vec::new(),
        }
    }

    /// Transformation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records in first-seen order.
    pub fn records(&self) -> &[PerformanceRecord] {
        &self.records
    }

    /// Folds incoming records; returns whether any was inserted or replaced.
    fn merge_records(
        &mut self,
        incoming: Vec<EtlPerformanceStats>,
        studio_type: &StudioEtlType,
        cutoff: Option<DateTime<Utc>>,
        task_name: &str,
    ) -> bool {
        // Rebuilt per call, never retained.
        let mut positions: HashMap<i64, usize> = self
            .records
            .iter()
            .enumerate()
            .map(|(pos, record)| (record.id(), pos))
            .collect();

        let mut changed = false;
        for stats in incoming {
            let id = stats.id;
            let record = match PerformanceRecord::derive(stats, studio_type) {
                Ok(record) => record,
                Err(e) => {
                    warn!(task = task_name, transformation = %self.name, id, error = %e, "skipping ETL performance record");
                    continue;
                }
            };

            if let Some(cutoff) = cutoff {
                if record.started_at <= cutoff {
                    continue;
                }
            }

            match positions.get(&id) {
                Some(&pos) => {
                    if self.records[pos].stats != record.stats {
                        self.records[pos] = record;
                        changed = true;
                    }
                }
                None => {
                    positions.insert(id, self.records.len());
                    self.records.push(record);
                    changed = true;
                }
            }
        }
        changed
    }
}

/// One ETL task and its transformations.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskGroup {
    key: TaskGroupKey,
    task_id: i64,
    transformations: Vec<TransformationGroup>,
    by_name: HashMap<String, usize>,
}

impl TaskGroup {
    fn new(key: TaskGroupKey, task_id: i64) -> Self {
        Self {
            key,
            task_id,
            transformations: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Group identity.
    pub fn key(&self) -> &TaskGroupKey {
        &self.key
    }

    /// Server-side task id as first seen.
    pub fn task_id(&self) -> i64 {
        self.task_id
    }

    /// Transformations in first-seen order.
    pub fn transformations(&self) -> &[TransformationGroup] {
        &self.transformations
    }

    /// Looks up a transformation by name.
    pub fn transformation(&self, name: &str) -> Option<&TransformationGroup> {
        self.by_name.get(name).map(|&pos| &self.transformations[pos])
    }

    fn transformation_mut(&mut self, name: &str) -> (&mut TransformationGroup, bool) {
        if let Some(&pos) = self.by_name.get(name) {
            return (&mut self.transformations[pos], false);
        }
        let pos = self.transformations.len();
        self.by_name.insert(name.to_string(), pos);
        self.transformations.push(TransformationGroup::new(name.to_string()));
        (&mut self.transformations[pos], true)
    }
}

/// The merged ETL performance tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EtlTree {
    groups: Vec<TaskGroup>,
    by_key: HashMap<TaskGroupKey, usize>,
}

impl EtlTree {
    /// Task groups in first-seen order.
    pub fn groups(&self) -> &[TaskGroup] {
        &self.groups
    }

    /// Looks up a task group.
    pub fn group(&self, key: &TaskGroupKey) -> Option<&TaskGroup> {
        self.by_key.get(key).map(|&pos| &self.groups[pos])
    }

    /// Total number of records across all groups.
    pub fn record_count(&self) -> usize {
        self.groups
            .iter()
            .flat_map(|g| g.transformations.iter())
            .map(|t| t.records.len())
            .sum()
    }

    fn group_mut(&mut self, key: TaskGroupKey, task_id: i64) -> (&mut TaskGroup, bool) {
        if let Some(&pos) = self.by_key.get(&key) {
            return (&mut self.groups[pos], false);
        }
        let pos = self.groups.len();
        self.by_key.insert(key.clone(), pos);
        self.groups.push(TaskGroup::new(key, task_id));
        (&mut self.groups[pos], true)
    }
}

/// One flattened record for per-source tables.
#[derive(Debug, Clone, PartialEq)]
pub struct EtlRow {
    /// Owning task.
    pub task: TaskGroupKey,
    /// Owning transformation.
    pub transformation: String,
    /// The record.
    pub record: PerformanceRecord,
}

impl TabularView for EtlTree {
    type Row = EtlRow;

    fn rows(&self) -> Vec<EtlRow> {
        let mut rows = Vec::with_capacity(self.record_count());
        for group in &self.groups {
            for transformation in &group.transformations {
                for record in &transformation.records {
                    rows.push(EtlRow {
                        task: group.key.clone(),
                        transformation: transformation.name.clone(),
                        record: record.clone(),
                    });
                }
            }
        }
        rows
    }
}

/// # ETL Merge Engine
///
/// Owns an `EtlTree` and folds `EtlTaskPerformanceStats` batches into it.
#[derive(Debug, Default)]
pub struct EtlMergeEngine {
    tree: EtlTree,
    cutoff: Option<DateTime<Utc>>,
}

impl EtlMergeEngine {
    /// Creates an engine with an optional ingestion cutoff.
    pub fn new(cutoff: Option<DateTime<Utc>>) -> Self {
        Self {
            tree: EtlTree::default(),
            cutoff,
        }
    }

    /// The cutoff fixed at construction.
    pub fn cutoff(&self) -> Option<DateTime<Utc>> {
        self.cutoff
    }
}

impl MergeEngine for EtlMergeEngine {
    type Item = EtlTaskPerformanceStats;
    type Tree = EtlTree;

    fn ingest(&mut self, batch: Vec<EtlTaskPerformanceStats>) -> bool {
        let cutoff = self.cutoff;
        let mut changed = false;

        for task in batch {
            let key = TaskGroupKey::of(&task);
            let studio_type = StudioEtlType::derive(&task.etl_type, task.etl_sub_type.as_deref());

            let (group, created) = self.tree.group_mut(key, task.task_id);
            if created {
                debug!(task = %task.task_name, kind = %task.etl_type, "new ETL task group");
            }
            changed |= created;

            for process in task.stats {
                let (transformation, created) = group.transformation_mut(&process.transformation_name);
                changed |= created;
                changed |= transformation.merge_records(process.performance, &studio_type, cutoff, &task.task_name);
            }
        }

        changed
    }

    fn tree(&self) -> &EtlTree {
        &self.tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    const T0: &str = "2024-03-01T10:00:00Z";
    const T1: &str = "2024-03-01T10:00:05Z";
    const T2: &str = "2024-03-01T10:00:10Z";

    fn batch(value: serde_json::Value) -> Vec<EtlTaskPerformanceStats> {
        serde_json::from_value(value).unwrap()
    }

    fn task(name: &str, transformation: &str, records: serde_json::Value) -> serde_json::Value {
        json!({
            "TaskName": name,
            "EtlType": "Raven",
            "Stats": [{ "TransformationName": transformation, "Performance": records }]
        })
    }

    fn ids(tree: &EtlTree, task_name: &str, transformation: &str) -> Vec<i64> {
        tree.group(&TaskGroupKey::new("Raven", task_name, ""))
            .and_then(|g| g.transformation(transformation))
            .map(|t| t.records().iter().map(|r| r.id()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn first_batch_creates_groups_and_record() {
        let mut engine = EtlMergeEngine::new(None);
        let changed = engine.ingest(batch(json!([task("Task1", "T1", json!([{ "Id": 1, "Started": T0 }]))])));

        assert!(changed);
        assert_eq!(engine.tree().groups().len(), 1);
        assert_eq!(engine.tree().groups()[0].transformations().len(), 1);
        assert_eq!(engine.tree().record_count(), 1);
    }

    #[test]
    fn update_replaces_in_place_and_append_keeps_order() {
        let mut engine = EtlMergeEngine::new(None);
        engine.ingest(batch(json!([task("Task1", "T1", json!([{ "Id": 1, "Started": T0 }]))])));

        let changed = engine.ingest(batch(json!([task(
            "Task1",
            "T1",
            json!([
                { "Id": 1, "Started": T0, "NumberOfLoadedItems": 42, "Completed": T1 },
                { "Id": 2, "Started": T1 }
            ])
        )])));

        assert!(changed);
        assert_eq!(ids(engine.tree(), "Task1", "T1"), vec![1, 2]);
        let first = &engine.tree().groups()[0].transformations()[0].records()[0];
        assert_eq!(first.stats.number_of_loaded_items, 42);
        assert!(first.is_completed());
    }

    #[test]
    fn same_batch_twice_is_not_a_change() {
        let input = json!([task("Task1", "T1", json!([{ "Id": 1, "Started": T0 }, { "Id": 2, "Started": T1 }]))]);
        let mut engine = EtlMergeEngine::new(None);

        assert!(engine.ingest(batch(input.clone())));
        let before = engine.tree().clone();
        assert!(!engine.ingest(batch(input)));
        assert_eq!(engine.tree(), &before);
    }

    #[test]
    fn resent_id_never_grows_the_list() {
        let mut engine = EtlMergeEngine::new(None);
        for loaded in 0..5 {
            engine.ingest(batch(json!([task(
                "Task1",
                "T1",
                json!([{ "Id": 7, "Started": T0, "NumberOfLoadedItems": loaded }])
            )])));
        }
        assert_eq!(ids(engine.tree(), "Task1", "T1"), vec![7]);
        assert_eq!(engine.tree().groups()[0].transformations()[0].records()[0].stats.number_of_loaded_items, 4);
    }

    #[test]
    fn cutoff_drops_records_at_or_before_it() {
        let cutoff = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let mut engine = EtlMergeEngine::new(Some(cutoff));

        let only_old = json!([task("Task1", "T1", json!([{ "Id": 1, "Started": T0 }]))]);
        // The group is new, so the first call still reports a change.
        assert!(engine.ingest(batch(only_old.clone())));
        assert!(!engine.ingest(batch(only_old)));
        assert_eq!(engine.tree().record_count(), 0);

        assert!(engine.ingest(batch(json!([task("Task1", "T1", json!([{ "Id": 2, "Started": T1 }]))]))));
        assert_eq!(ids(engine.tree(), "Task1", "T1"), vec![2]);
    }

    #[test]
    fn invalid_record_is_skipped_rest_of_batch_kept() {
        let mut engine = EtlMergeEngine::new(None);
        engine.ingest(batch(json!([task(
            "Task1",
            "T1",
            json!([
                { "Id": 1, "Started": T0 },
                { "Id": 2, "Started": "not a date" },
                { "Id": 3, "Started": T1, "Completed": "also not a date" },
                { "Id": 4, "Started": T2 }
            ])
        )])));
        assert_eq!(ids(engine.tree(), "Task1", "T1"), vec![1, 4]);
    }

    #[test]
    fn derived_error_flags_follow_counters() {
        let mut engine = EtlMergeEngine::new(None);
        engine.ingest(batch(json!([task(
            "Task1",
            "T1",
            json!([
                { "Id": 1, "Started": T0, "SuccessfullyLoaded": false },
                { "Id": 2, "Started": T1, "TransformationErrorCount": 3 },
                { "Id": 3, "Started": T2, "SuccessfullyLoaded": true }
            ])
        )])));
        let records = engine.tree().groups()[0].transformations()[0].records();
        assert!(records[0].has_load_errors && records[0].has_errors && !records[0].has_transform_errors);
        assert!(records[1].has_transform_errors && records[1].has_errors && !records[1].has_load_errors);
        assert!(!records[2].has_errors);

        // Recomputed when the record is resent.
        engine.ingest(batch(json!([task("Task1", "T1", json!([{ "Id": 1, "Started": T0, "SuccessfullyLoaded": true }]))])));
        assert!(!engine.tree().groups()[0].transformations()[0].records()[0].has_errors);
    }

    #[test]
    fn queue_tasks_key_on_sub_kind() {
        let mut engine = EtlMergeEngine::new(None);
        engine.ingest(batch(json!([
            { "TaskName": "Q", "EtlType": "Queue", "EtlSubType": "Kafka",
              "Stats": [{ "TransformationName": "T1", "Performance": [{ "Id": 1, "Started": T0 }] }] },
            { "TaskName": "Q", "EtlType": "Queue", "EtlSubType": "RabbitMq",
              "Stats": [{ "TransformationName": "T1", "Performance": [{ "Id": 1, "Started": T0 }] }] }
        ])));

        let groups = engine.tree().groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key(), &TaskGroupKey::new("Queue", "Q", "Kafka"));
        assert_eq!(groups[0].transformations()[0].records()[0].studio_type, StudioEtlType::Kafka);
        assert_eq!(groups[1].transformations()[0].records()[0].studio_type, StudioEtlType::RabbitMq);
    }

    #[test]
    fn unknown_queue_broker_still_shows_records() {
        let mut engine = EtlMergeEngine::new(None);
        let changed = engine.ingest(batch(json!([
            { "TaskName": "Q", "EtlType": "Queue", "EtlSubType": "Pulsar",
              "Stats": [{ "TransformationName": "T1", "Performance": [{ "Id": 1, "Started": T0 }] }] },
            { "TaskName": "R", "EtlType": "Queue",
              "Stats": [{ "TransformationName": "T1", "Performance": [{ "Id": 1, "Started": T0 }] }] }
        ])));
        assert!(changed);
        assert_eq!(engine.tree().record_count(), 2);

        let groups = engine.tree().groups();
        assert_eq!(
            groups[0].transformations()[0].records()[0].studio_type,
            StudioEtlType::Other("Pulsar".to_string())
        );
        assert_eq!(
            groups[1].transformations()[0].records()[0].studio_type,
            StudioEtlType::Other("Queue".to_string())
        );
    }

    #[test]
    fn rows_flatten_in_display_order() {
        let mut engine = EtlMergeEngine::new(None);
        engine.ingest(batch(json!([
            task("A", "T1", json!([{ "Id": 1, "Started": T0 }, { "Id": 2, "Started": T1 }])),
            task("B", "T9", json!([{ "Id": 1, "Started": T2 }]))
        ])));
        let rows = engine.tree().rows();
        let labels: Vec<(String, String, i64)> = rows
            .iter()
            .map(|r| (r.task.name.clone(), r.transformation.clone(), r.record.id()))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("A".to_string(), "T1".to_string(), 1),
                ("A".to_string(), "T1".to_string(), 2),
                ("B".to_string(), "T9".to_string(), 1),
            ]
        );
    }
}
