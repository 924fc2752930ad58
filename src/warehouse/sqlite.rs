use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_types::{BigInt, Bool, Nullable, Text};
use diesel::sqlite::{Sqlite, SqliteConnection};
use tracing::debug;

use super::{
    AppendRows, FieldValue, MergeRows, Table, TableNames, WarehouseError, WarehouseSink,
    allowed_patches,
};
use crate::buffer::{
    MemberFieldUpdate, MemberRow, MessageCountRow, MessageDetailRow, PresenceLoginRow, ThreadRow,
    VoiceActivityRow,
};

type BoxedQuery = BoxedSqlQuery<'static, Sqlite, SqlQuery>;

fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn date_to_string(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn establish_connection(path: &str) -> Result<SqliteConnection, WarehouseError> {
    SqliteConnection::establish(path).map_err(|e| WarehouseError::Connection(e.to_string()))
}

fn create_statement(table: Table, name: &str) -> String {
    let body = match table {
        Table::Members => {
            "user_id TEXT PRIMARY KEY NOT NULL,
            user_name TEXT NOT NULL,
            display_name TEXT NOT NULL,
            is_bot BOOLEAN NOT NULL DEFAULT 0,
            is_booster BOOLEAN NOT NULL DEFAULT 0,
            role TEXT NOT NULL DEFAULT '',
            joined_at TEXT NOT NULL,
            status TEXT NOT NULL,
            updated_at TEXT NOT NULL"
        }
        Table::MessageCounts => {
            "date TEXT NOT NULL,
            user_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            message_count BIGINT NOT NULL DEFAULT 0,
            PRIMARY KEY (date, user_id, channel_id)"
        }
        Table::MessageDetails => {
            "message_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            user_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            thread_id TEXT,
            message_content TEXT NOT NULL"
        }
        Table::VoiceActivity => {
            "date TEXT NOT NULL,
            user_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            duration_seconds BIGINT NOT NULL DEFAULT 0,
            PRIMARY KEY (date, user_id, channel_id)"
        }
        Table::Threads => {
            "created_at TEXT NOT NULL,
            user_id TEXT NOT NULL,
            thread_name TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            thread_id TEXT NOT NULL"
        }
        Table::PresenceLogins => {
            "logged_at TEXT NOT NULL,
            user_id TEXT NOT NULL,
            user_name TEXT NOT NULL"
        }
    };
    format!("CREATE TABLE IF NOT EXISTS {name} (\n            {body}\n        )")
}

fn insert_sql(name: &str, columns: &[&str]) -> String {
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {name} ({}) VALUES ({placeholders})",
        columns.join(", ")
    )
}

fn upsert_sql(name: &str, columns: &[&str], keys: &[&str], additive: Option<&str>) -> String {
    let assignments = match additive {
        Some(column) => format!("{column} = {column} + excluded.{column}"),
        None => columns
            .iter()
            .filter(|column| !keys.contains(column))
            .map(|column| format!("{column} = excluded.{column}"))
            .collect::<Vec<_>>()
            .join(", "),
    };
    format!(
        "{} ON CONFLICT ({}) DO UPDATE SET {assignments}",
        insert_sql(name, columns),
        keys.join(", ")
    )
}

fn bind_member(query: BoxedQuery, row: &MemberRow) -> BoxedQuery {
    query
        .bind::<Text, _>(row.user_id.clone())
        .bind::<Text, _>(row.user_name.clone())
        .bind::<Text, _>(row.display_name.clone())
        .bind::<Bool, _>(row.is_bot)
        .bind::<Bool, _>(row.is_booster)
        .bind::<Text, _>(row.roles.clone())
        .bind::<Text, _>(datetime_to_string(&row.joined_at))
        .bind::<Text, _>(row.status.clone())
        .bind::<Text, _>(datetime_to_string(&row.updated_at))
}

fn bind_message_count(query: BoxedQuery, row: &MessageCountRow) -> BoxedQuery {
    query
        .bind::<Text, _>(date_to_string(&row.date))
        .bind::<Text, _>(row.user_id.clone())
        .bind::<Text, _>(row.channel_id.clone())
        .bind::<BigInt, _>(row.message_count)
}

fn bind_voice(query: BoxedQuery, row: &VoiceActivityRow) -> BoxedQuery {
    query
        .bind::<Text, _>(date_to_string(&row.date))
        .bind::<Text, _>(row.user_id.clone())
        .bind::<Text, _>(row.channel_id.clone())
        .bind::<BigInt, _>(row.duration_seconds)
}

fn bind_message_detail(query: BoxedQuery, row: &MessageDetailRow) -> BoxedQuery {
    query
        .bind::<Text, _>(row.message_id.clone())
        .bind::<Text, _>(datetime_to_string(&row.created_at))
        .bind::<Text, _>(row.user_id.clone())
        .bind::<Text, _>(row.channel_id.clone())
        .bind::<Nullable<Text>, _>(row.thread_id.clone())
        .bind::<Text, _>(row.content.clone())
}

fn bind_thread(query: BoxedQuery, row: &ThreadRow) -> BoxedQuery {
    query
        .bind::<Text, _>(datetime_to_string(&row.created_at))
        .bind::<Text, _>(row.user_id.clone())
        .bind::<Text, _>(row.name.clone())
        .bind::<Text, _>(row.parent_channel_id.clone())
        .bind::<Text, _>(row.thread_id.clone())
}

fn bind_presence_login(query: BoxedQuery, row: &PresenceLoginRow) -> BoxedQuery {
    query
        .bind::<Text, _>(datetime_to_string(&row.logged_at))
        .bind::<Text, _>(row.user_id.clone())
        .bind::<Text, _>(row.user_name.clone())
}

/// Runs `sql` once per row, binding each row with `bind`.
fn execute_each<R>(
    conn: &mut SqliteConnection,
    sql: &str,
    rows: &[R],
    bind: fn(BoxedQuery, &R) -> BoxedQuery,
) -> Result<usize, WarehouseError> {
    for row in rows {
        let query = diesel::sql_query(sql.to_string()).into_boxed::<Sqlite>();
        bind(query, row).execute(conn)?;
    }
    Ok(rows.len())
}

/// SQLite-backed warehouse. Each call opens its own connection on the
/// blocking pool and writes its batch in one transaction.
pub struct SqliteWarehouse {
    db_path: Arc<String>,
    tables: TableNames,
}

impl SqliteWarehouse {
    pub fn new(db_path: impl Into<String>, tables: TableNames) -> Self {
        Self {
            db_path: Arc::new(db_path.into()),
            tables,
        }
    }

    #[cfg(test)]
    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Creates every warehouse table that does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), WarehouseError> {
        let statements: Vec<String> = Table::ALL
            .iter()
            .map(|table| create_statement(*table, &self.tables.name(*table)))
            .collect();

        self.with_transaction(move |conn| {
            for statement in &statements {
                diesel::sql_query(statement.as_str())
                    .execute(conn)
                    .map_err(|e| WarehouseError::Migration(e.to_string()))?;
            }
            Ok(statements.len())
        })
        .await
        .map(|created| debug!("ensured {created} warehouse tables"))
    }

    async fn with_transaction<F>(&self, work: F) -> Result<usize, WarehouseError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<usize, WarehouseError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            conn.transaction(work)
        })
        .await
        .map_err(|e| WarehouseError::Task(format!("database task failed: {e}")))?
    }
}

#[async_trait]
impl WarehouseSink for SqliteWarehouse {
    async fn append(&self, table: &str, rows: AppendRows) -> Result<usize, WarehouseError> {
        let sql = insert_sql(table, rows.table().columns());
        self.with_transaction(move |conn| match &rows {
            AppendRows::MessageDetails(rows) => execute_each(conn, &sql, rows, bind_message_detail),
            AppendRows::Threads(rows) => execute_each(conn, &sql, rows, bind_thread),
            AppendRows::PresenceLogins(rows) => {
                execute_each(conn, &sql, rows, bind_presence_login)
            }
        })
        .await
    }

    async fn merge(&self, table: &str, rows: MergeRows) -> Result<usize, WarehouseError> {
        let sql = upsert_sql(
            table,
            rows.table().columns(),
            rows.key_columns(),
            rows.additive_column(),
        );
        self.with_transaction(move |conn| match &rows {
            MergeRows::Members(rows) => execute_each(conn, &sql, rows, bind_member),
            MergeRows::MessageCounts(rows) => execute_each(conn, &sql, rows, bind_message_count),
            MergeRows::VoiceActivity(rows) => execute_each(conn, &sql, rows, bind_voice),
        })
        .await
    }

    async fn update_fields(
        &self,
        table: &str,
        updates: Vec<MemberFieldUpdate>,
    ) -> Result<usize, WarehouseError> {
        let patches = allowed_patches(updates);
        let table = table.to_string();
        self.with_transaction(move |conn| {
            for patch in &patches {
                // Column names come from MemberField only; values are always bound.
                let sql = format!(
                    "UPDATE {table} SET {} = ?, updated_at = ? WHERE user_id = ?",
                    patch.field.column()
                );
                let query = diesel::sql_query(sql).into_boxed::<Sqlite>();
                let query = match &patch.value {
                    FieldValue::Text(value) => query.bind::<Text, _>(value.clone()),
                    FieldValue::Bool(flag) => query.bind::<Bool, _>(*flag),
                };
                query
                    .bind::<Text, _>(datetime_to_string(&patch.updated_at))
                    .bind::<Text, _>(patch.user_id.clone())
                    .execute(conn)?;
            }
            Ok(patches.len())
        })
        .await
    }
}
