//! Data access for the `pdb_table_meta` relation: table descriptors, the
//! per-table stream sequence counter, and the trim high-water mark.

use sqlx::{AnyConnection, Row};

use pretender_model::table::TableMetadata;

use crate::error::{EngineError, Result};

use super::{quote_ident, schema::META_TABLE, Dialect};

pub(crate) async fn insert(
    conn: &mut AnyConnection,
    dialect: Dialect,
    meta: &TableMetadata,
) -> Result<()> {
    let sql = format!(
        "INSERT INTO {} (table_name, meta, stream_seq, last_trim_at, created_at) \
         VALUES ({}, {}, 0, 0, {})",
        quote_ident(META_TABLE),
        dialect.placeholder(1),
        dialect.placeholder(2),
        dialect.placeholder(3),
    );
    let result = sqlx::query(&sql)
        .bind(&meta.table_name)
        .bind(serde_json::to_string(meta)?)
        .bind(meta.created_at.timestamp_millis())
        .execute(conn)
        .await;
    match result {
        Ok(_) => Ok(()),
        // Two simultaneous CreateTables race on the primary key; the
        // first committer wins and the loser surfaces ResourceInUse.
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(EngineError::ResourceInUse(meta.table_name.clone()))
        }
        Err(other) => Err(other.into()),
    }
}

pub(crate) async fn update(
    conn: &mut AnyConnection,
    dialect: Dialect,
    meta: &TableMetadata,
) -> Result<()> {
    let sql = format!(
        "UPDATE {} SET meta = {} WHERE table_name = {}",
        quote_ident(META_TABLE),
        dialect.placeholder(1),
        dialect.placeholder(2),
    );
    sqlx::query(&sql)
        .bind(serde_json::to_string(meta)?)
        .bind(&meta.table_name)
        .execute(conn)
        .await?;
    Ok(())
}

pub(crate) async fn fetch(
    conn: &mut AnyConnection,
    dialect: Dialect,
    table: &str,
) -> Result<Option<TableMetadata>> {
    let sql = format!(
        "SELECT meta FROM {} WHERE table_name = {}",
        quote_ident(META_TABLE),
        dialect.placeholder(1),
    );
    let row = sqlx::query(&sql).bind(table).fetch_optional(conn).await?;
    match row {
        Some(row) => {
            let raw: String = row.try_get("meta")?;
            Ok(Some(serde_json::from_str(&raw)?))
        }
        None => Ok(None),
    }
}

pub(crate) async fn delete(conn: &mut AnyConnection, dialect: Dialect, table: &str) -> Result<bool> {
    let sql = format!(
        "DELETE FROM {} WHERE table_name = {}",
        quote_ident(META_TABLE),
        dialect.placeholder(1),
    );
    let result = sqlx::query(&sql).bind(table).execute(conn).await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn list_names(
    conn: &mut AnyConnection,
    dialect: Dialect,
    start_after: Option<&str>,
    limit: i64,
) -> Result<Vec<String>> {
    let sql = match start_after {
        Some(_) => format!(
            "SELECT table_name FROM {} WHERE table_name > {} ORDER BY table_name LIMIT {}",
            quote_ident(META_TABLE),
            dialect.placeholder(1),
            dialect.placeholder(2),
        ),
        None => format!(
            "SELECT table_name FROM {} ORDER BY table_name LIMIT {}",
            quote_ident(META_TABLE),
            dialect.placeholder(1),
        ),
    };
    let mut query = sqlx::query(&sql);
    if let Some(start) = start_after {
        query = query.bind(start);
    }
    let rows = query.bind(limit).fetch_all(conn).await?;
    rows.iter()
        .map(|row| Ok(row.try_get::<String, _>("table_name")?))
        .collect()
}

pub(crate) async fn list_all(conn: &mut AnyConnection) -> Result<Vec<TableMetadata>> {
    let sql = format!(
        "SELECT meta FROM {} ORDER BY table_name",
        quote_ident(META_TABLE)
    );
    let rows = sqlx::query(&sql).fetch_all(conn).await?;
    rows.iter()
        .map(|row| {
            let raw: String = row.try_get("meta")?;
            Ok(serde_json::from_str(&raw)?)
        })
        .collect()
}

/// Advance and return the stream sequence counter for one table.
///
/// The UPDATE takes a row lock on the metadata row, serializing stream
/// appends per table inside their enclosing transactions; that is what
/// makes sequence numbers dense and monotonic on every backend.
pub(crate) async fn next_stream_seq(
    conn: &mut AnyConnection,
    dialect: Dialect,
    table: &str,
) -> Result<i64> {
    let update = format!(
        "UPDATE {} SET stream_seq = stream_seq + 1 WHERE table_name = {}",
        quote_ident(META_TABLE),
        dialect.placeholder(1),
    );
    let result = sqlx::query(&update).bind(table).execute(&mut *conn).await?;
    if result.rows_affected() == 0 {
        return Err(EngineError::ResourceNotFound(table.to_string()));
    }
    let select = format!(
        "SELECT stream_seq FROM {} WHERE table_name = {}",
        quote_ident(META_TABLE),
        dialect.placeholder(1),
    );
    let row = sqlx::query(&select).bind(table).fetch_one(conn).await?;
    Ok(row.try_get("stream_seq")?)
}

pub(crate) async fn mark_trimmed(
    conn: &mut AnyConnection,
    dialect: Dialect,
    table: &str,
    at_millis: i64,
) -> Result<()> {
    let sql = format!(
        "UPDATE {} SET last_trim_at = {} WHERE table_name = {}",
        quote_ident(META_TABLE),
        dialect.placeholder(1),
        dialect.placeholder(2),
    );
    sqlx::query(&sql).bind(at_millis).bind(table).execute(conn).await?;
    Ok(())
}

pub(crate) async fn last_trim_at(
    conn: &mut AnyConnection,
    dialect: Dialect,
    table: &str,
) -> Result<i64> {
    let sql = format!(
        "SELECT last_trim_at FROM {} WHERE table_name = {}",
        quote_ident(META_TABLE),
        dialect.placeholder(1),
    );
    let row = sqlx::query(&sql).bind(table).fetch_optional(conn).await?;
    match row {
        Some(row) => Ok(row.try_get("last_trim_at")?),
        None => Err(EngineError::ResourceNotFound(table.to_string())),
    }
}
