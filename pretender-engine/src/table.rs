//! Table metadata lifecycle and per-table schema provisioning.

use chrono::Utc;
use sqlx::AnyConnection;
use std::collections::HashMap;
use std::sync::Arc;

use pretender_model::attr;
use pretender_model::ops::table::{
    AttributeDefinition, CreateTableInput, CreateTableOutput, DeleteTableInput, DeleteTableOutput,
    DescribeTableInput, DescribeTableOutput, GlobalSecondaryIndexDescription, KeySchemaElement,
    ListTablesInput, ListTablesOutput, Projection, StreamSpecification, TableDescription,
    UpdateTableInput, UpdateTableOutput, UpdateTimeToLiveInput, UpdateTimeToLiveOutput,
};
use pretender_model::table::{
    valid_table_name, IndexMetadata, KeyType, ProjectionType, ScalarAttributeType, TableMetadata,
    TableStatus,
};

use crate::error::{EngineError, Result};
use crate::storage::{items, metadata, schema, Storage};

/// Manages the metadata relation and the per-table SQL schema.
#[derive(Clone, Debug)]
pub struct TableManager {
    storage: Arc<Storage>,
}

impl TableManager {
    pub fn new(storage: Arc<Storage>) -> Self {
        TableManager { storage }
    }

    /// Fetch a table's metadata or fail with ResourceNotFound.
    pub async fn metadata(&self, table: &str) -> Result<TableMetadata> {
        let mut conn = self.storage.acquire().await?;
        metadata::fetch(&mut conn, self.storage.dialect(), table)
            .await?
            .ok_or_else(|| EngineError::ResourceNotFound(table.to_string()))
    }

    /// Metadata for every table; used by the retention loops.
    pub(crate) async fn all_metadata(&self) -> Result<Vec<TableMetadata>> {
        let mut conn = self.storage.acquire().await?;
        metadata::list_all(&mut conn).await
    }

    /// Provision a table: its metadata row, item relation, index mirrors,
    /// and stream relation, all in one transaction. The table is ACTIVE
    /// the moment this returns.
    pub async fn create_table(&self, input: CreateTableInput) -> Result<CreateTableOutput> {
        let meta = metadata_from_input(&input)?;
        meta.validate()?;

        let dialect = self.storage.dialect();
        let mut tx = self.storage.begin().await?;
        if metadata::fetch(&mut *tx, dialect, &meta.table_name).await?.is_some() {
            return Err(EngineError::ResourceInUse(meta.table_name));
        }
        metadata::insert(&mut *tx, dialect, &meta).await?;
        schema::create_item_table(&mut *tx, &schema::item_table(&meta.table_name)).await?;
        for index in &meta.global_secondary_indexes {
            schema::create_gsi_table(
                &mut *tx,
                &schema::gsi_table(&meta.table_name, &index.index_name),
            )
            .await?;
        }
        if meta.stream_enabled {
            schema::create_stream_table(&mut *tx, &schema::stream_table(&meta.table_name)).await?;
        }
        tx.commit().await?;

        Ok(CreateTableOutput {
            table_description: describe(&meta, Some(0), TableStatus::Active),
        })
    }

    pub async fn describe_table(&self, input: DescribeTableInput) -> Result<DescribeTableOutput> {
        let meta = self.metadata(&input.table_name).await?;
        let mut conn = self.storage.acquire().await?;
        let count = items::count(&mut conn, &schema::item_table(&meta.table_name)).await?;
        Ok(DescribeTableOutput {
            table: describe(&meta, Some(count), TableStatus::Active),
        })
    }

    pub async fn list_tables(&self, input: ListTablesInput) -> Result<ListTablesOutput> {
        let limit = match input.limit {
            Some(0) => return Err(EngineError::Validation("Limit must be at least 1".to_string())),
            Some(n) => n.min(100) as i64,
            None => 100,
        };
        let mut conn = self.storage.acquire().await?;
        let mut names = metadata::list_names(
            &mut conn,
            self.storage.dialect(),
            input.exclusive_start_table_name.as_deref(),
            limit + 1,
        )
        .await?;
        let last_evaluated_table_name = if names.len() as i64 > limit {
            names.truncate(limit as usize);
            names.last().cloned()
        } else {
            None
        };
        Ok(ListTablesOutput {
            table_names: names,
            last_evaluated_table_name,
        })
    }

    /// Drop a table: its metadata row, item relation, index mirrors, and
    /// stream relation go atomically.
    pub async fn delete_table(&self, input: DeleteTableInput) -> Result<DeleteTableOutput> {
        let dialect = self.storage.dialect();
        let mut tx = self.storage.begin().await?;
        let meta = metadata::fetch(&mut *tx, dialect, &input.table_name)
            .await?
            .ok_or_else(|| EngineError::ResourceNotFound(input.table_name.clone()))?;
        metadata::delete(&mut *tx, dialect, &meta.table_name).await?;
        schema::drop_table(&mut *tx, &schema::item_table(&meta.table_name)).await?;
        for index in &meta.global_secondary_indexes {
            schema::drop_table(&mut *tx, &schema::gsi_table(&meta.table_name, &index.index_name))
                .await?;
        }
        schema::drop_table(&mut *tx, &schema::stream_table(&meta.table_name)).await?;
        tx.commit().await?;

        Ok(DeleteTableOutput {
            table_description: describe(&meta, None, TableStatus::Deleting),
        })
    }

    /// Alter secondary indexes and stream settings.
    pub async fn update_table(&self, input: UpdateTableInput) -> Result<UpdateTableOutput> {
        let dialect = self.storage.dialect();
        let mut tx = self.storage.begin().await?;
        let mut meta = metadata::fetch(&mut *tx, dialect, &input.table_name)
            .await?
            .ok_or_else(|| EngineError::ResourceNotFound(input.table_name.clone()))?;

        for update in input.global_secondary_index_updates.unwrap_or_default() {
            if let Some(create) = update.create {
                let index = index_metadata(&create.index_name, &create.key_schema, &create.projection)?;
                if meta.index(&index.index_name).is_some() {
                    return Err(EngineError::ResourceInUse(index.index_name));
                }
                let relation = schema::gsi_table(&meta.table_name, &index.index_name);
                schema::create_gsi_table(&mut *tx, &relation).await?;
                backfill_index(&mut *tx, dialect, &meta, &index, &relation).await?;
                meta.global_secondary_indexes.push(index);
            } else if let Some(delete) = update.delete {
                let position = meta
                    .global_secondary_indexes
                    .iter()
                    .position(|i| i.index_name == delete.index_name)
                    .ok_or_else(|| EngineError::ResourceNotFound(delete.index_name.clone()))?;
                meta.global_secondary_indexes.remove(position);
                schema::drop_table(&mut *tx, &schema::gsi_table(&meta.table_name, &delete.index_name))
                    .await?;
            }
        }

        if let Some(spec) = input.stream_specification {
            if spec.stream_enabled {
                let view_type = spec.stream_view_type.ok_or_else(|| {
                    EngineError::Validation(
                        "StreamViewType is required when enabling a stream".to_string(),
                    )
                })?;
                schema::create_stream_table(&mut *tx, &schema::stream_table(&meta.table_name))
                    .await?;
                meta.stream_enabled = true;
                meta.stream_view_type = Some(view_type);
            } else {
                // Existing records stay until the trimmer retires them.
                meta.stream_enabled = false;
            }
        }

        meta.validate()?;
        metadata::update(&mut *tx, dialect, &meta).await?;
        tx.commit().await?;

        Ok(UpdateTableOutput {
            table_description: describe(&meta, None, TableStatus::Active),
        })
    }

    pub async fn update_time_to_live(
        &self,
        input: UpdateTimeToLiveInput,
    ) -> Result<UpdateTimeToLiveOutput> {
        let dialect = self.storage.dialect();
        let mut tx = self.storage.begin().await?;
        let mut meta = metadata::fetch(&mut *tx, dialect, &input.table_name)
            .await?
            .ok_or_else(|| EngineError::ResourceNotFound(input.table_name.clone()))?;

        let spec = input.time_to_live_specification;
        meta.ttl_attribute = Some(spec.attribute_name.clone());
        meta.ttl_enabled = spec.enabled;
        meta.validate()?;
        metadata::update(&mut *tx, dialect, &meta).await?;
        tx.commit().await?;

        Ok(UpdateTimeToLiveOutput {
            time_to_live_specification: spec,
        })
    }
}

/// Populate a freshly created index mirror from the existing items.
async fn backfill_index(
    conn: &mut AnyConnection,
    dialect: crate::storage::Dialect,
    meta: &TableMetadata,
    index: &IndexMetadata,
    relation: &str,
) -> Result<()> {
    let rows = items::scan_page(conn, dialect, &schema::item_table(&meta.table_name), None, None)
        .await?;
    for row in rows {
        let item = attr::from_json(&row.attributes)?;
        if let Some(mirror) = mirror_row(meta, index, &item, &row.hash_value, &row.sort_value)? {
            items::gsi_insert(conn, dialect, relation, &mirror).await?;
        }
    }
    Ok(())
}

/// Build the mirror row one item contributes to one index, when the
/// item carries the index keys.
pub(crate) fn mirror_row(
    meta: &TableMetadata,
    index: &IndexMetadata,
    item: &pretender_model::Item,
    base_hash: &str,
    base_sort: &str,
) -> Result<Option<items::GsiRow>> {
    let Some(hash_value) = item.get(&index.hash_key).and_then(|v| v.key_string()) else {
        return Ok(None);
    };
    let sort_value = match &index.sort_key {
        Some(sort_key) => match item.get(sort_key).and_then(|v| v.key_string()) {
            Some(value) => value,
            // Items missing any index key attribute have no index entry.
            None => return Ok(None),
        },
        None => String::new(),
    };

    let projection = match index.projection_type {
        ProjectionType::All => item.clone(),
        ProjectionType::KeysOnly => projected(meta, index, item, &[]),
        ProjectionType::Include => projected(meta, index, item, &index.non_key_attributes),
    };

    Ok(Some(items::GsiRow {
        hash_value,
        sort_value,
        base_hash: base_hash.to_string(),
        base_sort: base_sort.to_string(),
        projection: attr::to_json(&projection)?,
    }))
}

fn projected(
    meta: &TableMetadata,
    index: &IndexMetadata,
    item: &pretender_model::Item,
    extra: &[String],
) -> pretender_model::Item {
    let mut names: Vec<&String> = vec![&meta.hash_key, &index.hash_key];
    if let Some(sort) = &meta.sort_key {
        names.push(sort);
    }
    if let Some(sort) = &index.sort_key {
        names.push(sort);
    }
    names.extend(extra.iter());
    names
        .into_iter()
        .filter_map(|name| item.get(name).map(|value| (name.clone(), value.clone())))
        .collect()
}

fn metadata_from_input(input: &CreateTableInput) -> Result<TableMetadata> {
    let types: HashMap<&str, ScalarAttributeType> = input
        .attribute_definitions
        .iter()
        .map(|def| (def.attribute_name.as_str(), def.attribute_type))
        .collect();
    let (hash_key, sort_key) = split_key_schema(&input.key_schema)?;
    let hash_key_type = *types.get(hash_key.as_str()).ok_or_else(|| {
        EngineError::Validation(format!("no attribute definition for key attribute {}", hash_key))
    })?;
    let sort_key_type = match &sort_key {
        Some(name) => Some(*types.get(name.as_str()).ok_or_else(|| {
            EngineError::Validation(format!("no attribute definition for key attribute {}", name))
        })?),
        None => None,
    };

    let mut global_secondary_indexes = Vec::new();
    for index in input.global_secondary_indexes.iter().flatten() {
        global_secondary_indexes.push(index_metadata(
            &index.index_name,
            &index.key_schema,
            &index.projection,
        )?);
    }

    let (stream_enabled, stream_view_type) = match &input.stream_specification {
        Some(spec) if spec.stream_enabled => {
            let view_type = spec.stream_view_type.ok_or_else(|| {
                EngineError::Validation(
                    "StreamViewType is required when enabling a stream".to_string(),
                )
            })?;
            (true, Some(view_type))
        }
        _ => (false, None),
    };

    Ok(TableMetadata {
        table_name: input.table_name.clone(),
        hash_key,
        hash_key_type,
        sort_key,
        sort_key_type,
        global_secondary_indexes,
        ttl_attribute: None,
        ttl_enabled: false,
        stream_enabled,
        stream_view_type,
        created_at: Utc::now(),
    })
}

fn index_metadata(
    index_name: &str,
    key_schema: &[KeySchemaElement],
    projection: &Projection,
) -> Result<IndexMetadata> {
    if !valid_table_name(index_name) {
        return Err(EngineError::Validation(format!(
            "invalid index name: {}",
            index_name
        )));
    }
    let (hash_key, sort_key) = split_key_schema(key_schema)?;
    let projection_type = projection.projection_type.ok_or_else(|| {
        EngineError::Validation(format!("index {} is missing a projection type", index_name))
    })?;
    Ok(IndexMetadata {
        index_name: index_name.to_string(),
        hash_key,
        sort_key,
        projection_type,
        non_key_attributes: projection.non_key_attributes.clone().unwrap_or_default(),
    })
}

fn split_key_schema(schema: &[KeySchemaElement]) -> Result<(String, Option<String>)> {
    let mut hash = None;
    let mut sort = None;
    for element in schema {
        let slot = match element.key_type {
            KeyType::Hash => &mut hash,
            KeyType::Range => &mut sort,
        };
        if slot.replace(element.attribute_name.clone()).is_some() {
            return Err(EngineError::Validation(
                "key schema declares the same key role twice".to_string(),
            ));
        }
    }
    let hash = hash.ok_or_else(|| {
        EngineError::Validation("key schema must declare a HASH key".to_string())
    })?;
    Ok((hash, sort))
}

fn describe(meta: &TableMetadata, item_count: Option<i64>, status: TableStatus) -> TableDescription {
    let mut key_schema = vec![KeySchemaElement {
        attribute_name: meta.hash_key.clone(),
        key_type: KeyType::Hash,
    }];
    let mut attribute_definitions = vec![AttributeDefinition {
        attribute_name: meta.hash_key.clone(),
        attribute_type: meta.hash_key_type,
    }];
    if let (Some(sort), Some(sort_type)) = (&meta.sort_key, meta.sort_key_type) {
        key_schema.push(KeySchemaElement {
            attribute_name: sort.clone(),
            key_type: KeyType::Range,
        });
        attribute_definitions.push(AttributeDefinition {
            attribute_name: sort.clone(),
            attribute_type: sort_type,
        });
    }

    let global_secondary_indexes = meta
        .global_secondary_indexes
        .iter()
        .map(|index| {
            let mut key_schema = vec![KeySchemaElement {
                attribute_name: index.hash_key.clone(),
                key_type: KeyType::Hash,
            }];
            if let Some(sort) = &index.sort_key {
                key_schema.push(KeySchemaElement {
                    attribute_name: sort.clone(),
                    key_type: KeyType::Range,
                });
            }
            GlobalSecondaryIndexDescription {
                index_name: index.index_name.clone(),
                key_schema,
                projection: Projection {
                    projection_type: Some(index.projection_type),
                    non_key_attributes: if index.non_key_attributes.is_empty() {
                        None
                    } else {
                        Some(index.non_key_attributes.clone())
                    },
                },
                index_status: TableStatus::Active,
            }
        })
        .collect();

    TableDescription {
        table_name: meta.table_name.clone(),
        table_status: status,
        key_schema,
        attribute_definitions,
        creation_date_time: meta.created_at,
        item_count,
        global_secondary_indexes,
        stream_specification: meta.stream_enabled.then(|| StreamSpecification {
            stream_enabled: true,
            stream_view_type: meta.stream_view_type,
        }),
        latest_stream_arn: meta.stream_arn(),
        latest_stream_label: meta.stream_enabled.then(|| meta.stream_label()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretender_model::attr::AttributeValue;
    use pretender_model::table::StreamViewType;

    fn input() -> CreateTableInput {
        serde_json::from_value(serde_json::json!({
            "TableName": "Events",
            "AttributeDefinitions": [
                { "AttributeName": "userId", "AttributeType": "S" },
                { "AttributeName": "ts", "AttributeType": "S" }
            ],
            "KeySchema": [
                { "AttributeName": "userId", "KeyType": "HASH" },
                { "AttributeName": "ts", "KeyType": "RANGE" }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn metadata_from_input_maps_the_key_schema() {
        let meta = metadata_from_input(&input()).unwrap();
        assert_eq!("userId", meta.hash_key);
        assert_eq!(Some("ts".to_string()), meta.sort_key);
        assert_eq!(ScalarAttributeType::S, meta.hash_key_type);
        assert!(!meta.stream_enabled);
    }

    #[test]
    fn missing_attribute_definition_is_rejected() {
        let mut bad = input();
        bad.attribute_definitions.pop();
        assert!(metadata_from_input(&bad).is_err());
    }

    #[test]
    fn stream_spec_requires_a_view_type() {
        let mut bad = input();
        bad.stream_specification = Some(StreamSpecification {
            stream_enabled: true,
            stream_view_type: None,
        });
        assert!(metadata_from_input(&bad).is_err());

        let mut good = input();
        good.stream_specification = Some(StreamSpecification {
            stream_enabled: true,
            stream_view_type: Some(StreamViewType::NewAndOldImages),
        });
        let meta = metadata_from_input(&good).unwrap();
        assert!(meta.stream_enabled);
    }

    #[test]
    fn mirror_row_skips_items_without_index_keys() {
        let meta = metadata_from_input(&input()).unwrap();
        let index = IndexMetadata {
            index_name: "by-kind".into(),
            hash_key: "kind".into(),
            sort_key: None,
            projection_type: ProjectionType::KeysOnly,
            non_key_attributes: Vec::new(),
        };
        let mut item = pretender_model::Item::new();
        item.insert("userId".into(), AttributeValue::S("u1".into()));
        item.insert("ts".into(), AttributeValue::S("2024-01-01".into()));
        assert!(mirror_row(&meta, &index, &item, "u1", "2024-01-01")
            .unwrap()
            .is_none());

        item.insert("kind".into(), AttributeValue::S("click".into()));
        let row = mirror_row(&meta, &index, &item, "u1", "2024-01-01")
            .unwrap()
            .unwrap();
        assert_eq!("click", row.hash_value);
        let projection = attr::from_json(&row.projection).unwrap();
        assert!(projection.contains_key("userId"));
        assert!(projection.contains_key("kind"));
        assert!(!projection.contains_key("payload"));
    }
}
