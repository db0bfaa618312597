//! Per-item outcomes of an applied change plan.

use serde::Serialize;
use serde_json::Value;

use storysync_core::EntityKey;

use crate::executor::ParallelResult;

/// Skipped items are reported with this error.
pub const NOT_STARTED: &str = "not started: batch stopped early";

/// What a successful mutation hands back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSuccess {
    pub key: EntityKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl BatchSuccess {
    pub fn new(key: EntityKey) -> Self {
        Self { key, data: None }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// One entry per submitted item, in submission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOperation {
    pub index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<EntityKey>,
    /// Empty on success.
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl BatchOperation {
    pub fn succeeded(index: usize, outcome: BatchSuccess) -> Self {
        Self {
            index,
            success: true,
            key: Some(outcome.key),
            error: String::new(),
            data: outcome.data,
        }
    }

    pub fn failed(index: usize, error: impl Into<String>) -> Self {
        Self {
            index,
            success: false,
            key: None,
            error: error.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResult {
    pub operations: Vec<BatchOperation>,
}

impl BatchResult {
    /// Flatten an executor run; never-started items count as failures.
    pub fn from_parallel(run: ParallelResult<BatchSuccess>) -> Self {
        let mut operations: Vec<BatchOperation> = run
            .results
            .into_iter()
            .map(|(index, outcome)| BatchOperation::succeeded(index, outcome))
            .chain(
                run.errors
                    .into_iter()
                    .map(|(index, error)| BatchOperation::failed(index, error)),
            )
            .chain(
                run.skipped
                    .into_iter()
                    .map(|index| BatchOperation::failed(index, NOT_STARTED)),
            )
            .collect();
        operations.sort_by_key(|op| op.index);
        Self { operations }
    }

    pub fn total(&self) -> usize {
        self.operations.len()
    }

    pub fn succeeded(&self) -> usize {
        self.operations.iter().filter(|op| op.success).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn success(&self) -> bool {
        self.failed() == 0
    }

    /// Keys of successful operations, in submission order.
    pub fn created_keys(&self) -> Vec<&EntityKey> {
        self.operations
            .iter()
            .filter(|op| op.success)
            .filter_map(|op| op.key.as_ref())
            .collect()
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.operations
            .iter()
            .filter(|op| !op.success)
            .map(|op| op.index)
            .collect()
    }

    /// Append operations from a later wave, re-indexing them after the
    /// existing ones.
    pub fn extend(&mut self, later: BatchResult) {
        let offset = self.operations.len();
        self.operations
            .extend(later.operations.into_iter().map(|mut op| {
                op.index += offset;
                op
            }));
    }
}
