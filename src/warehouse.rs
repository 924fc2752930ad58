use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::buffer::{
    MemberFieldUpdate, MemberRow, MessageCountRow, MessageDetailRow, PresenceLoginRow, ThreadRow,
    VoiceActivityRow,
};

pub mod tables;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(test)]
pub mod memory;

pub use self::tables::{MemberField, Table, TableNames};

#[cfg(feature = "sqlite")]
pub use self::sqlite::SqliteWarehouse;

/// Opens the warehouse at `path` and creates any missing tables.
pub async fn open(path: &str, tables: TableNames) -> Result<Arc<dyn WarehouseSink>, WarehouseError> {
    #[cfg(feature = "sqlite")]
    {
        let warehouse = SqliteWarehouse::new(path, tables);
        warehouse.ensure_schema().await?;
        Ok(Arc::new(warehouse))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = (path, tables);
        Err(WarehouseError::Connection(
            "SQLite feature not enabled".to_string(),
        ))
    }
}

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("query error: {0}")]
    Query(String),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("warehouse task failed: {0}")]
    Task(String),
}

impl From<diesel::result::Error> for WarehouseError {
    fn from(err: diesel::result::Error) -> Self {
        WarehouseError::Query(err.to_string())
    }
}

/// Rows for the insert-only tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendRows {
    MessageDetails(Vec<MessageDetailRow>),
    Threads(Vec<ThreadRow>),
    PresenceLogins(Vec<PresenceLoginRow>),
}

impl AppendRows {
    pub fn table(&self) -> Table {
        match self {
            AppendRows::MessageDetails(_) => Table::MessageDetails,
            AppendRows::Threads(_) => Table::Threads,
            AppendRows::PresenceLogins(_) => Table::PresenceLogins,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        match self {
            AppendRows::MessageDetails(rows) => rows.len(),
            AppendRows::Threads(rows) => rows.len(),
            AppendRows::PresenceLogins(rows) => rows.len(),
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Rows upserted by key. Additive tables add their value column to the
/// stored one; member identities overwrite it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeRows {
    Members(Vec<MemberRow>),
    MessageCounts(Vec<MessageCountRow>),
    VoiceActivity(Vec<VoiceActivityRow>),
}

impl MergeRows {
    pub fn table(&self) -> Table {
        match self {
            MergeRows::Members(_) => Table::Members,
            MergeRows::MessageCounts(_) => Table::MessageCounts,
            MergeRows::VoiceActivity(_) => Table::VoiceActivity,
        }
    }

    pub fn key_columns(&self) -> &'static [&'static str] {
        match self {
            MergeRows::Members(_) => &["user_id"],
            MergeRows::MessageCounts(_) | MergeRows::VoiceActivity(_) => {
                &["date", "user_id", "channel_id"]
            }
        }
    }

    pub fn additive_column(&self) -> Option<&'static str> {
        match self {
            MergeRows::Members(_) => None,
            MergeRows::MessageCounts(_) => Some("message_count"),
            MergeRows::VoiceActivity(_) => Some("duration_seconds"),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        match self {
            MergeRows::Members(rows) => rows.len(),
            MergeRows::MessageCounts(rows) => rows.len(),
            MergeRows::VoiceActivity(rows) => rows.len(),
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Destination for flushed rows.
///
/// Implementations own their own timeouts; the flush scheduler never holds
/// buffer state while one of these calls is pending.
#[async_trait]
pub trait WarehouseSink: Send + Sync {
    /// Inserts rows as-is. Calling twice with the same rows duplicates them.
    async fn append(&self, table: &str, rows: AppendRows) -> Result<usize, WarehouseError>;

    /// Upserts rows keyed by [`MergeRows::key_columns`].
    async fn merge(&self, table: &str, rows: MergeRows) -> Result<usize, WarehouseError>;

    /// Applies member point patches. Columns outside [`MemberField`] are
    /// skipped with a warning; returns how many patches were applied.
    async fn update_fields(
        &self,
        table: &str,
        updates: Vec<MemberFieldUpdate>,
    ) -> Result<usize, WarehouseError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Bool(bool),
}

/// A member field update that passed the allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPatch {
    pub user_id: String,
    pub field: MemberField,
    pub value: FieldValue,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Filters `updates` through the mutable-column allow-list, logging and
/// dropping anything else.
pub fn allowed_patches(updates: Vec<MemberFieldUpdate>) -> Vec<FieldPatch> {
    updates
        .into_iter()
        .filter_map(|update| {
            let field = match update.column.parse::<MemberField>() {
                Ok(field) => field,
                Err(err) => {
                    warn!("skipping member update for user {}: {err}", update.user_id);
                    return None;
                }
            };
            let value = match field {
                MemberField::IsBooster => match update.new_value.parse::<bool>() {
                    Ok(flag) => FieldValue::Bool(flag),
                    Err(_) => {
                        warn!(
                            "skipping member update for user {}: {:?} is not a boolean",
                            update.user_id, update.new_value
                        );
                        return None;
                    }
                },
                _ => FieldValue::Text(update.new_value),
            };
            Some(FieldPatch {
                user_id: update.user_id,
                field,
                value,
                updated_at: update.updated_at,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn update(column: &str, value: &str) -> MemberFieldUpdate {
        MemberFieldUpdate {
            user_id: "u1".to_string(),
            column: column.to_string(),
            new_value: value.to_string(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn allow_list_drops_unknown_columns() {
        let patches = allowed_patches(vec![
            update("status", "left"),
            update("user_id = 'x'; --", "boom"),
            update("joined_at", "2020-01-01"),
            update("display_name", "Al"),
        ]);

        let fields: Vec<_> = patches.iter().map(|p| p.field).collect();
        assert_eq!(fields, vec![MemberField::Status, MemberField::DisplayName]);
    }

    #[test]
    fn booster_flag_must_be_boolean() {
        let patches = allowed_patches(vec![update("is_booster", "true"), update("is_booster", "yes")]);

        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].value, FieldValue::Bool(true));
    }

    #[test]
    fn merge_rows_describe_their_keys() {
        let counts = MergeRows::MessageCounts(Vec::new());
        assert_eq!(counts.key_columns(), &["date", "user_id", "channel_id"]);
        assert_eq!(counts.additive_column(), Some("message_count"));
        assert_eq!(counts.table(), Table::MessageCounts);

        let members = MergeRows::Members(Vec::new());
        assert_eq!(members.key_columns(), &["user_id"]);
        assert_eq!(members.additive_column(), None);
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn open_prepares_a_usable_warehouse() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("metrics.db");
        let sink = open(&path.to_string_lossy(), TableNames::new(Some("open_")))
            .await
            .unwrap();

        let written = sink
            .update_fields("open_dim_member", vec![update("status", "left")])
            .await
            .unwrap();
        assert_eq!(written, 1);
    }

    #[cfg(not(feature = "sqlite"))]
    #[tokio::test]
    async fn open_without_a_backend_fails() {
        let result = open("metrics.db", TableNames::new(None)).await;
        assert!(matches!(result, Err(WarehouseError::Connection(_))));
    }
}
