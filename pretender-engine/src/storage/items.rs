//! Data access for the per-table item relations and their secondary
//! index mirrors.

use sqlx::{AnyConnection, Row};

use crate::error::Result;

use super::{quote_ident, Dialect};

/// One row of a `pdb_item_<name>` relation.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ItemRow {
    pub hash_value: String,
    pub sort_value: String,
    pub attributes: String,
}

/// One row of a `pdb_item_<name>_gsi_<index>` mirror.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct GsiRow {
    pub hash_value: String,
    pub sort_value: String,
    pub base_hash: String,
    pub base_sort: String,
    pub projection: String,
}

fn item_row(row: &sqlx::any::AnyRow) -> Result<ItemRow> {
    Ok(ItemRow {
        hash_value: row.try_get("hash_value")?,
        sort_value: row.try_get("sort_value")?,
        attributes: row.try_get("attributes")?,
    })
}

pub(crate) async fn get(
    conn: &mut AnyConnection,
    dialect: Dialect,
    relation: &str,
    hash: &str,
    sort: &str,
) -> Result<Option<ItemRow>> {
    let sql = format!(
        "SELECT hash_value, sort_value, attributes FROM {} \
         WHERE hash_value = {} AND sort_value = {}",
        quote_ident(relation),
        dialect.placeholder(1),
        dialect.placeholder(2),
    );
    let row = sqlx::query(&sql)
        .bind(hash)
        .bind(sort)
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(item_row).transpose()
}

pub(crate) async fn upsert(
    conn: &mut AnyConnection,
    dialect: Dialect,
    relation: &str,
    row: &ItemRow,
    now_millis: i64,
) -> Result<()> {
    // Both backends speak the same ON CONFLICT clause.
    let sql = format!(
        "INSERT INTO {} (hash_value, sort_value, attributes, created_at, updated_at) \
         VALUES ({}, {}, {}, {}, {}) \
         ON CONFLICT (hash_value, sort_value) \
         DO UPDATE SET attributes = excluded.attributes, updated_at = excluded.updated_at",
        quote_ident(relation),
        dialect.placeholder(1),
        dialect.placeholder(2),
        dialect.placeholder(3),
        dialect.placeholder(4),
        dialect.placeholder(5),
    );
    sqlx::query(&sql)
        .bind(&row.hash_value)
        .bind(&row.sort_value)
        .bind(&row.attributes)
        .bind(now_millis)
        .bind(now_millis)
        .execute(conn)
        .await?;
    Ok(())
}

pub(crate) async fn delete(
    conn: &mut AnyConnection,
    dialect: Dialect,
    relation: &str,
    hash: &str,
    sort: &str,
) -> Result<bool> {
    let sql = format!(
        "DELETE FROM {} WHERE hash_value = {} AND sort_value = {}",
        quote_ident(relation),
        dialect.placeholder(1),
        dialect.placeholder(2),
    );
    let result = sqlx::query(&sql).bind(hash).bind(sort).execute(conn).await?;
    Ok(result.rows_affected() > 0)
}

/// Fetch every row of one hash partition, ordered by the stored sort
/// value. Range predicates and typed ordering are applied by the caller,
/// which knows the sort key's attribute type.
pub(crate) async fn fetch_partition(
    conn: &mut AnyConnection,
    dialect: Dialect,
    relation: &str,
    hash: &str,
) -> Result<Vec<ItemRow>> {
    let sql = format!(
        "SELECT hash_value, sort_value, attributes FROM {} \
         WHERE hash_value = {} ORDER BY sort_value",
        quote_ident(relation),
        dialect.placeholder(1),
    );
    let rows = sqlx::query(&sql).bind(hash).fetch_all(conn).await?;
    rows.iter().map(item_row).collect()
}

/// Keyset-paginated full traversal in (hash, sort) order.
pub(crate) async fn scan_page(
    conn: &mut AnyConnection,
    dialect: Dialect,
    relation: &str,
    start_after: Option<(&str, &str)>,
    limit: Option<i64>,
) -> Result<Vec<ItemRow>> {
    let mut sql = format!(
        "SELECT hash_value, sort_value, attributes FROM {}",
        quote_ident(relation)
    );
    let mut n = 0;
    if start_after.is_some() {
        sql.push_str(&format!(
            " WHERE hash_value > {} OR (hash_value = {} AND sort_value > {})",
            dialect.placeholder(n + 1),
            dialect.placeholder(n + 2),
            dialect.placeholder(n + 3),
        ));
        n += 3;
    }
    sql.push_str(" ORDER BY hash_value, sort_value");
    if limit.is_some() {
        sql.push_str(&format!(" LIMIT {}", dialect.placeholder(n + 1)));
    }

    let mut query = sqlx::query(&sql);
    if let Some((hash, sort)) = start_after {
        query = query.bind(hash).bind(hash).bind(sort);
    }
    if let Some(limit) = limit {
        query = query.bind(limit);
    }
    let rows = query.fetch_all(conn).await?;
    rows.iter().map(item_row).collect()
}

pub(crate) async fn count(conn: &mut AnyConnection, relation: &str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) AS n FROM {}", quote_ident(relation));
    let row = sqlx::query(&sql).fetch_one(conn).await?;
    Ok(row.try_get("n")?)
}

pub(crate) async fn gsi_delete_base(
    conn: &mut AnyConnection,
    dialect: Dialect,
    relation: &str,
    base_hash: &str,
    base_sort: &str,
) -> Result<()> {
    let sql = format!(
        "DELETE FROM {} WHERE base_hash = {} AND base_sort = {}",
        quote_ident(relation),
        dialect.placeholder(1),
        dialect.placeholder(2),
    );
    sqlx::query(&sql)
        .bind(base_hash)
        .bind(base_sort)
        .execute(conn)
        .await?;
    Ok(())
}

pub(crate) async fn gsi_insert(
    conn: &mut AnyConnection,
    dialect: Dialect,
    relation: &str,
    row: &GsiRow,
) -> Result<()> {
    let sql = format!(
        "INSERT INTO {} (hash_value, sort_value, base_hash, base_sort, projection) \
         VALUES ({}, {}, {}, {}, {})",
        quote_ident(relation),
        dialect.placeholder(1),
        dialect.placeholder(2),
        dialect.placeholder(3),
        dialect.placeholder(4),
        dialect.placeholder(5),
    );
    sqlx::query(&sql)
        .bind(&row.hash_value)
        .bind(&row.sort_value)
        .bind(&row.base_hash)
        .bind(&row.base_sort)
        .bind(&row.projection)
        .execute(conn)
        .await?;
    Ok(())
}

pub(crate) async fn gsi_partition(
    conn: &mut AnyConnection,
    dialect: Dialect,
    relation: &str,
    hash: &str,
) -> Result<Vec<GsiRow>> {
    let sql = format!(
        "SELECT hash_value, sort_value, base_hash, base_sort, projection FROM {} \
         WHERE hash_value = {} ORDER BY sort_value, base_hash, base_sort",
        quote_ident(relation),
        dialect.placeholder(1),
    );
    let rows = sqlx::query(&sql).bind(hash).fetch_all(conn).await?;
    rows.iter()
        .map(|row| {
            Ok(GsiRow {
                hash_value: row.try_get("hash_value")?,
                sort_value: row.try_get("sort_value")?,
                base_hash: row.try_get("base_hash")?,
                base_sort: row.try_get("base_sort")?,
                projection: row.try_get("projection")?,
            })
        })
        .collect()
}
