//! Relation naming and per-table DDL. Types are restricted to TEXT and
//! BIGINT, which sqlite and postgres spell identically, so the DDL is
//! dialect-free.

use sqlx::AnyConnection;

use crate::error::Result;

use super::quote_ident;

/// The central metadata relation.
pub const META_TABLE: &str = "pdb_table_meta";

/// The item relation backing one user table.
pub fn item_table(table: &str) -> String {
    format!("pdb_item_{}", table)
}

/// The mirror relation backing one secondary index.
pub fn gsi_table(table: &str, index: &str) -> String {
    format!("pdb_item_{}_gsi_{}", table, index)
}

/// The change-log relation backing one stream.
pub fn stream_table(table: &str) -> String {
    format!("pdb_stream_{}", table)
}

pub(crate) async fn create_meta_table(conn: &mut AnyConnection) -> Result<()> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} ( \
         table_name TEXT PRIMARY KEY, \
         meta TEXT NOT NULL, \
         stream_seq BIGINT NOT NULL DEFAULT 0, \
         last_trim_at BIGINT NOT NULL DEFAULT 0, \
         created_at BIGINT NOT NULL )",
        quote_ident(META_TABLE)
    );
    sqlx::query(&sql).execute(conn).await?;
    Ok(())
}

pub(crate) async fn create_item_table(conn: &mut AnyConnection, relation: &str) -> Result<()> {
    // sort_value is the empty string for tables without a sort key so
    // the primary key stays total.
    let sql = format!(
        "CREATE TABLE {} ( \
         hash_value TEXT NOT NULL, \
         sort_value TEXT NOT NULL DEFAULT '', \
         attributes TEXT NOT NULL, \
         created_at BIGINT NOT NULL, \
         updated_at BIGINT NOT NULL, \
         PRIMARY KEY (hash_value, sort_value) )",
        quote_ident(relation)
    );
    sqlx::query(&sql).execute(conn).await?;
    Ok(())
}

pub(crate) async fn create_gsi_table(conn: &mut AnyConnection, relation: &str) -> Result<()> {
    // Index keys are not unique across items, so the base keys join the
    // primary key.
    let sql = format!(
        "CREATE TABLE {} ( \
         hash_value TEXT NOT NULL, \
         sort_value TEXT NOT NULL DEFAULT '', \
         base_hash TEXT NOT NULL, \
         base_sort TEXT NOT NULL DEFAULT '', \
         projection TEXT NOT NULL, \
         PRIMARY KEY (hash_value, sort_value, base_hash, base_sort) )",
        quote_ident(relation)
    );
    sqlx::query(&sql).execute(conn).await?;
    Ok(())
}

pub(crate) async fn create_stream_table(conn: &mut AnyConnection, relation: &str) -> Result<()> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} ( \
         seq BIGINT PRIMARY KEY, \
         event_id TEXT NOT NULL, \
         event_type TEXT NOT NULL, \
         hash_value TEXT NOT NULL, \
         sort_value TEXT, \
         keys_json TEXT NOT NULL, \
         old_image TEXT, \
         new_image TEXT, \
         size_bytes BIGINT NOT NULL, \
         created_at BIGINT NOT NULL )",
        quote_ident(relation)
    );
    sqlx::query(&sql).execute(conn).await?;
    Ok(())
}

pub(crate) async fn drop_table(conn: &mut AnyConnection, relation: &str) -> Result<()> {
    let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(relation));
    sqlx::query(&sql).execute(conn).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_names_follow_the_pdb_prefix_scheme() {
        assert_eq!("pdb_item_Users", item_table("Users"));
        assert_eq!("pdb_item_Users_gsi_by-email", gsi_table("Users", "by-email"));
        assert_eq!("pdb_stream_Orders", stream_table("Orders"));
    }

    #[test]
    fn quoting_survives_dots_and_dashes() {
        assert_eq!("\"pdb_item_a.b-c\"", quote_ident("pdb_item_a.b-c"));
    }
}
