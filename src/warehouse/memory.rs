use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{AppendRows, FieldPatch, MergeRows, WarehouseError, WarehouseSink, allowed_patches};
use crate::buffer::MemberFieldUpdate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Append { table: String, rows: AppendRows },
    Merge { table: String, rows: MergeRows },
    Update { table: String, patches: Vec<FieldPatch> },
}

/// Records every write. Can be told to fail, or to park each call until
/// [`RecordingSink::release`] is called.
#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    failing: AtomicBool,
    gate: Option<Arc<Notify>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Notify::new())),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    async fn record(&self, call: SinkCall, rows: usize) -> Result<usize, WarehouseError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(WarehouseError::Connection("warehouse unreachable".to_string()));
        }
        self.calls.lock().push(call);
        Ok(rows)
    }
}

#[async_trait]
impl WarehouseSink for RecordingSink {
    async fn append(&self, table: &str, rows: AppendRows) -> Result<usize, WarehouseError> {
        let len = rows.len();
        let call = SinkCall::Append {
            table: table.to_string(),
            rows,
        };
        self.record(call, len).await
    }

    async fn merge(&self, table: &str, rows: MergeRows) -> Result<usize, WarehouseError> {
        let len = rows.len();
        let call = SinkCall::Merge {
            table: table.to_string(),
            rows,
        };
        self.record(call, len).await
    }

    async fn update_fields(
        &self,
        table: &str,
        updates: Vec<MemberFieldUpdate>,
    ) -> Result<usize, WarehouseError> {
        let patches = allowed_patches(updates);
        let len = patches.len();
        let call = SinkCall::Update {
            table: table.to_string(),
            patches,
        };
        self.record(call, len).await
    }
}
