//! Data access for the per-table stream relations.

use sqlx::{AnyConnection, Row};

use crate::error::Result;

use super::{quote_ident, Dialect};

/// One row of a `pdb_stream_<name>` relation.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct StreamRow {
    pub seq: i64,
    pub event_id: String,
    pub event_type: String,
    pub hash_value: String,
    pub sort_value: Option<String>,
    pub keys_json: String,
    pub old_image: Option<String>,
    pub new_image: Option<String>,
    pub size_bytes: i64,
    pub created_at: i64,
}

fn stream_row(row: &sqlx::any::AnyRow) -> Result<StreamRow> {
    Ok(StreamRow {
        seq: row.try_get("seq")?,
        event_id: row.try_get("event_id")?,
        event_type: row.try_get("event_type")?,
        hash_value: row.try_get("hash_value")?,
        sort_value: row.try_get("sort_value")?,
        keys_json: row.try_get("keys_json")?,
        old_image: row.try_get("old_image")?,
        new_image: row.try_get("new_image")?,
        size_bytes: row.try_get("size_bytes")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) async fn append(
    conn: &mut AnyConnection,
    dialect: Dialect,
    relation: &str,
    row: &StreamRow,
) -> Result<()> {
    let sql = format!(
        "INSERT INTO {} (seq, event_id, event_type, hash_value, sort_value, \
         keys_json, old_image, new_image, size_bytes, created_at) \
         VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
        quote_ident(relation),
        dialect.placeholder(1),
        dialect.placeholder(2),
        dialect.placeholder(3),
        dialect.placeholder(4),
        dialect.placeholder(5),
        dialect.placeholder(6),
        dialect.placeholder(7),
        dialect.placeholder(8),
        dialect.placeholder(9),
        dialect.placeholder(10),
    );
    sqlx::query(&sql)
        .bind(row.seq)
        .bind(&row.event_id)
        .bind(&row.event_type)
        .bind(&row.hash_value)
        .bind(&row.sort_value)
        .bind(&row.keys_json)
        .bind(&row.old_image)
        .bind(&row.new_image)
        .bind(row.size_bytes)
        .bind(row.created_at)
        .execute(conn)
        .await?;
    Ok(())
}

/// Fetch up to `limit` records with `seq >= from_seq`, in order.
pub(crate) async fn fetch_from(
    conn: &mut AnyConnection,
    dialect: Dialect,
    relation: &str,
    from_seq: i64,
    limit: i64,
) -> Result<Vec<StreamRow>> {
    let sql = format!(
        "SELECT seq, event_id, event_type, hash_value, sort_value, keys_json, \
         old_image, new_image, size_bytes, created_at \
         FROM {} WHERE seq >= {} ORDER BY seq LIMIT {}",
        quote_ident(relation),
        dialect.placeholder(1),
        dialect.placeholder(2),
    );
    let rows = sqlx::query(&sql)
        .bind(from_seq)
        .bind(limit)
        .fetch_all(conn)
        .await?;
    rows.iter().map(stream_row).collect()
}

/// The lowest and highest sequence numbers currently in the shard, when
/// any records remain.
pub(crate) async fn bounds(
    conn: &mut AnyConnection,
    relation: &str,
) -> Result<Option<(i64, i64)>> {
    let sql = format!(
        "SELECT MIN(seq) AS lo, MAX(seq) AS hi FROM {}",
        quote_ident(relation)
    );
    let row = sqlx::query(&sql).fetch_one(conn).await?;
    let lo: Option<i64> = row.try_get("lo")?;
    let hi: Option<i64> = row.try_get("hi")?;
    Ok(lo.zip(hi))
}

/// Delete records created before the cutoff. Returns how many went.
pub(crate) async fn trim_before(
    conn: &mut AnyConnection,
    dialect: Dialect,
    relation: &str,
    cutoff_millis: i64,
) -> Result<u64> {
    let sql = format!(
        "DELETE FROM {} WHERE created_at < {}",
        quote_ident(relation),
        dialect.placeholder(1),
    );
    let result = sqlx::query(&sql).bind(cutoff_millis).execute(conn).await?;
    Ok(result.rows_affected())
}
