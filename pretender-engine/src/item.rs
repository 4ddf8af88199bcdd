//! Item data-plane operations: puts, gets, updates, deletes, queries,
//! scans, batches, and transactions.
//!
//! Every mutation runs inside one SQL transaction spanning the item
//! relation, the index mirrors, and the stream relation, so a mutation
//! either lands everywhere or nowhere.

use chrono::Utc;
use sqlx::AnyConnection;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use pretender_model::attr::{self, AttributeValue, Item};
use pretender_model::ops::item::{
    BatchGetItemInput, BatchGetItemOutput, BatchWriteItemInput, BatchWriteItemOutput,
    DeleteItemInput, DeleteItemOutput, GetItemInput, GetItemOutput, ItemResponse, KeysAndAttributes,
    PutItemInput, PutItemOutput, QueryInput, QueryOutput, ScanInput, ScanOutput,
    TransactGetItemsInput, TransactGetItemsOutput, TransactWriteItem, TransactWriteItemsInput,
    TransactWriteItemsOutput, UpdateItemInput, UpdateItemOutput, WriteRequest,
};
use pretender_model::ops::{ConsumedCapacity, ReturnConsumedCapacity, ReturnValues};
use pretender_model::stream::OperationType;
use pretender_model::table::{IndexMetadata, ScalarAttributeType, TableMetadata};

use crate::capacity;
use crate::crypto::AttributeEncryptor;
use crate::error::{CancellationReason, EngineError, Result};
use crate::expr::{
    compare_values, parse_condition, parse_key_condition, parse_projection, parse_update,
    project_item, ConditionExpression, UpdateExpression,
};
use crate::storage::items::{self, ItemRow};
use crate::storage::{schema, Storage};
use crate::stream::capture;
use crate::table::{mirror_row, TableManager};

/// Executes the item data plane against the storage layer.
#[derive(Clone, Debug)]
pub struct ItemManager {
    storage: Arc<Storage>,
    tables: Arc<TableManager>,
    encryptor: Arc<AttributeEncryptor>,
}

impl ItemManager {
    pub fn new(
        storage: Arc<Storage>,
        tables: Arc<TableManager>,
        encryptor: Arc<AttributeEncryptor>,
    ) -> Self {
        ItemManager {
            storage,
            tables,
            encryptor,
        }
    }

    pub async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput> {
        if !matches!(input.return_values, ReturnValues::None | ReturnValues::AllOld) {
            return Err(EngineError::Validation(
                "PutItem supports ReturnValues NONE and ALL_OLD".to_string(),
            ));
        }
        let meta = self.tables.metadata(&input.table_name).await?;
        let condition = parse_optional_condition(
            input.condition_expression.as_deref(),
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )?;

        let mut tx = self.storage.begin().await?;
        let old = self
            .put_in_tx(&mut *tx, &meta, &input.item, condition.as_ref())
            .await?;
        tx.commit().await?;

        Ok(PutItemOutput {
            attributes: match input.return_values {
                ReturnValues::AllOld => old,
                _ => None,
            },
            consumed_capacity: consumed(
                &meta,
                input.return_consumed_capacity,
                capacity::write_units(Some(&input.item))?,
            ),
        })
    }

    pub async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput> {
        let meta = self.tables.metadata(&input.table_name).await?;
        let projection = parse_optional_projection(
            input.projection_expression.as_deref(),
            &input.expression_attribute_names,
        )?;

        let mut conn = self.storage.acquire().await?;
        let item = self.get_plain(&mut conn, &meta, &input.key).await?;
        let units = capacity::read_units(item.as_ref())?;
        Ok(GetItemOutput {
            item: item.map(|item| match &projection {
                Some(paths) => project_item(&item, paths),
                None => item,
            }),
            consumed_capacity: consumed(&meta, input.return_consumed_capacity, units),
        })
    }

    pub async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput> {
        let meta = self.tables.metadata(&input.table_name).await?;
        let update = match &input.update_expression {
            Some(expr) => Some(parse_update(
                expr,
                &input.expression_attribute_names,
                &input.expression_attribute_values,
            )?),
            None => None,
        };
        let condition = parse_optional_condition(
            input.condition_expression.as_deref(),
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )?;

        let mut tx = self.storage.begin().await?;
        let (old, new) = self
            .update_in_tx(&mut *tx, &meta, &input.key, update.as_ref(), condition.as_ref())
            .await?;
        tx.commit().await?;

        let touched: Vec<String> = update
            .as_ref()
            .map(|u| u.touched_paths().into_iter().map(str::to_string).collect())
            .unwrap_or_default();
        let units = capacity::write_units(Some(&new))?;
        let attributes = match input.return_values {
            ReturnValues::None => None,
            ReturnValues::AllOld => old,
            ReturnValues::AllNew => Some(new),
            ReturnValues::UpdatedOld => old.map(|old| project_item(&old, &touched)).filter(|i| !i.is_empty()),
            ReturnValues::UpdatedNew => Some(project_item(&new, &touched)).filter(|i| !i.is_empty()),
        };
        Ok(UpdateItemOutput {
            attributes,
            consumed_capacity: consumed(&meta, input.return_consumed_capacity, units),
        })
    }

    pub async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput> {
        if !matches!(input.return_values, ReturnValues::None | ReturnValues::AllOld) {
            return Err(EngineError::Validation(
                "DeleteItem supports ReturnValues NONE and ALL_OLD".to_string(),
            ));
        }
        let meta = self.tables.metadata(&input.table_name).await?;
        let condition = parse_optional_condition(
            input.condition_expression.as_deref(),
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )?;

        let mut tx = self.storage.begin().await?;
        let old = self
            .delete_in_tx(&mut *tx, &meta, &input.key, condition.as_ref())
            .await?;
        tx.commit().await?;

        let units = capacity::write_units(old.as_ref())?;
        Ok(DeleteItemOutput {
            attributes: match input.return_values {
                ReturnValues::AllOld => old,
                _ => None,
            },
            consumed_capacity: consumed(&meta, input.return_consumed_capacity, units),
        })
    }

    pub async fn query(&self, input: QueryInput) -> Result<QueryOutput> {
        if matches!(input.limit, Some(0)) {
            return Err(EngineError::Validation("Limit must be at least 1".to_string()));
        }
        let meta = self.tables.metadata(&input.table_name).await?;
        let key_condition = parse_key_condition(
            &input.key_condition_expression,
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )?;
        let filter = parse_optional_condition(
            input.filter_expression.as_deref(),
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )?;
        let projection = parse_optional_projection(
            input.projection_expression.as_deref(),
            &input.expression_attribute_names,
        )?;

        let index = match &input.index_name {
            Some(name) => Some(meta.index(name).cloned().ok_or_else(|| {
                EngineError::Validation(format!(
                    "table {} has no index named {}",
                    meta.table_name, name
                ))
            })?),
            None => None,
        };
        let (hash_key, sort_key) = match &index {
            Some(index) => (index.hash_key.as_str(), index.sort_key.as_deref()),
            None => (meta.hash_key.as_str(), meta.sort_key.as_deref()),
        };
        if key_condition.hash_key != hash_key {
            return Err(EngineError::Validation(format!(
                "query condition must test the hash key {} for equality",
                hash_key
            )));
        }
        if let Some(sort) = &key_condition.sort {
            if Some(sort.key.as_str()) != sort_key {
                return Err(EngineError::Validation(format!(
                    "{} is not the sort key of the queried index",
                    sort.key
                )));
            }
        }
        if index.is_none() {
            check_key_type(meta.hash_key_type, &key_condition.hash_value, &meta.hash_key)?;
        }
        let hash_string = key_string_of(&key_condition.hash_value)?;

        let mut conn = self.storage.acquire().await?;
        let dialect = self.storage.dialect();
        let mut candidates = match &index {
            Some(idx) => {
                let relation = schema::gsi_table(&meta.table_name, &idx.index_name);
                let rows = items::gsi_partition(&mut conn, dialect, &relation, &hash_string).await?;
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    let stored = attr::from_json(&row.projection)?;
                    let sort = sort_key.and_then(|key| stored.get(key)).cloned();
                    out.push(Candidate {
                        sort,
                        base_hash: row.base_hash,
                        base_sort: row.base_sort,
                        stored,
                    });
                }
                out
            }
            None => {
                let relation = schema::item_table(&meta.table_name);
                let rows = items::fetch_partition(&mut conn, dialect, &relation, &hash_string).await?;
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    let stored = attr::from_json(&row.attributes)?;
                    let sort = sort_key.and_then(|key| stored.get(key)).cloned();
                    out.push(Candidate {
                        sort,
                        base_hash: row.hash_value,
                        base_sort: row.sort_value,
                        stored,
                    });
                }
                out
            }
        };

        if let Some(sort) = &key_condition.sort {
            candidates.retain(|c| c.sort.as_ref().is_some_and(|v| sort.test.matches(v)));
        }
        candidates.sort_by(|a, b| {
            let by_sort = match (&a.sort, &b.sort) {
                (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            };
            by_sort
                .then_with(|| a.base_hash.cmp(&b.base_hash))
                .then_with(|| a.base_sort.cmp(&b.base_sort))
        });
        if !input.scan_index_forward.unwrap_or(true) {
            candidates.reverse();
        }

        if let Some(start) = &input.exclusive_start_key {
            let (start_hash, start_sort) = item_key_strings(&meta, start)?;
            if let Some(position) = candidates
                .iter()
                .position(|c| c.base_hash == start_hash && c.base_sort == start_sort)
            {
                candidates.drain(..=position);
            }
        }

        let mut last_evaluated_key = None;
        if let Some(limit) = input.limit {
            let limit = limit as usize;
            if candidates.len() > limit {
                candidates.truncate(limit);
                if let Some(last) = candidates.last() {
                    last_evaluated_key =
                        Some(last_evaluated_from(&meta, index.as_ref(), &last.stored));
                }
            }
        }
        let scanned_count = candidates.len() as i64;

        let mut out_items = Vec::with_capacity(candidates.len());
        let mut units = 0.0;
        for candidate in candidates {
            let plain = self.encryptor.decrypt_on_read(&meta, candidate.stored)?;
            units += capacity::read_units(Some(&plain))?;
            if let Some(filter) = &filter {
                if !filter.evaluate(Some(&plain)) {
                    continue;
                }
            }
            out_items.push(match &projection {
                Some(paths) => project_item(&plain, paths),
                None => plain,
            });
        }

        Ok(QueryOutput {
            count: out_items.len() as i64,
            scanned_count,
            items: out_items,
            last_evaluated_key,
            consumed_capacity: consumed(&meta, input.return_consumed_capacity, units),
        })
    }

    pub async fn scan(&self, input: ScanInput) -> Result<ScanOutput> {
        if matches!(input.limit, Some(0)) {
            return Err(EngineError::Validation("Limit must be at least 1".to_string()));
        }
        let meta = self.tables.metadata(&input.table_name).await?;
        let filter = parse_optional_condition(
            input.filter_expression.as_deref(),
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )?;
        let projection = parse_optional_projection(
            input.projection_expression.as_deref(),
            &input.expression_attribute_names,
        )?;
        let start = match &input.exclusive_start_key {
            Some(key) => Some(item_key_strings(&meta, key)?),
            None => None,
        };

        let mut conn = self.storage.acquire().await?;
        let relation = schema::item_table(&meta.table_name);
        let mut rows = items::scan_page(
            &mut conn,
            self.storage.dialect(),
            &relation,
            start.as_ref().map(|(h, s)| (h.as_str(), s.as_str())),
            input.limit.map(|l| l as i64 + 1),
        )
        .await?;

        let mut last_evaluated_key = None;
        if let Some(limit) = input.limit {
            let limit = limit as usize;
            if rows.len() > limit {
                rows.truncate(limit);
            }
            if rows.len() == limit {
                if let Some(last) = rows.last() {
                    let stored = attr::from_json(&last.attributes)?;
                    last_evaluated_key = Some(last_evaluated_from(&meta, None, &stored));
                }
            }
        }
        let scanned_count = rows.len() as i64;

        let mut out_items = Vec::with_capacity(rows.len());
        let mut units = 0.0;
        for row in rows {
            let plain = self.decode_plain(&meta, &row.attributes)?;
            units += capacity::read_units(Some(&plain))?;
            if let Some(filter) = &filter {
                if !filter.evaluate(Some(&plain)) {
                    continue;
                }
            }
            out_items.push(match &projection {
                Some(paths) => project_item(&plain, paths),
                None => plain,
            });
        }

        Ok(ScanOutput {
            count: out_items.len() as i64,
            scanned_count,
            items: out_items,
            last_evaluated_key,
            consumed_capacity: consumed(&meta, input.return_consumed_capacity, units),
        })
    }

    /// Iterate the contained reads. A failing read parks its key in
    /// UnprocessedKeys instead of failing the batch; there is no
    /// atomicity across the batch.
    pub async fn batch_get(&self, input: BatchGetItemInput) -> Result<BatchGetItemOutput> {
        let mut responses = HashMap::new();
        let mut unprocessed_keys = HashMap::new();
        let mut consumed_capacity = Vec::new();

        for (table_name, request) in input.request_items {
            let meta = self.tables.metadata(&table_name).await?;
            let projection = parse_optional_projection(
                request.projection_expression.as_deref(),
                &request.expression_attribute_names,
            )?;

            let mut found = Vec::new();
            let mut failed = Vec::new();
            let mut units = 0.0;
            let mut conn = self.storage.acquire().await?;
            for key in &request.keys {
                match self.get_plain(&mut conn, &meta, key).await {
                    Ok(Some(item)) => {
                        units += capacity::read_units(Some(&item))?;
                        found.push(match &projection {
                            Some(paths) => project_item(&item, paths),
                            None => item,
                        });
                    }
                    Ok(None) => {}
                    Err(_) => failed.push(key.clone()),
                }
            }

            if let Some(capacity) = consumed(&meta, input.return_consumed_capacity, units) {
                consumed_capacity.push(capacity);
            }
            responses.insert(table_name.clone(), found);
            if !failed.is_empty() {
                unprocessed_keys.insert(
                    table_name,
                    KeysAndAttributes {
                        keys: failed,
                        projection_expression: request.projection_expression.clone(),
                        expression_attribute_names: request.expression_attribute_names.clone(),
                    },
                );
            }
        }

        Ok(BatchGetItemOutput {
            responses,
            unprocessed_keys,
            consumed_capacity,
        })
    }

    /// Iterate the contained writes, each in its own transaction. A
    /// failing write parks its request in UnprocessedItems.
    pub async fn batch_write(&self, input: BatchWriteItemInput) -> Result<BatchWriteItemOutput> {
        let mut unprocessed_items: HashMap<String, Vec<WriteRequest>> = HashMap::new();
        let mut consumed_capacity = Vec::new();

        for (table_name, requests) in input.request_items {
            let meta = self.tables.metadata(&table_name).await?;
            let mut units = 0.0;
            for request in requests {
                let outcome = match (&request.put_request, &request.delete_request) {
                    (Some(put), None) => {
                        units += capacity::write_units(Some(&put.item))?;
                        self.write_one(&meta, WriteKind::Put(&put.item)).await
                    }
                    (None, Some(delete)) => {
                        self.write_one(&meta, WriteKind::Delete(&delete.key)).await
                    }
                    _ => Err(EngineError::Validation(
                        "a write request must carry exactly one of PutRequest or DeleteRequest"
                            .to_string(),
                    )),
                };
                if outcome.is_err() {
                    unprocessed_items
                        .entry(table_name.clone())
                        .or_default()
                        .push(request);
                }
            }
            if let Some(capacity) = consumed(&meta, input.return_consumed_capacity, units) {
                consumed_capacity.push(capacity);
            }
        }

        Ok(BatchWriteItemOutput {
            unprocessed_items,
            consumed_capacity,
        })
    }

    /// Read every leg inside one transaction.
    pub async fn transact_get(&self, input: TransactGetItemsInput) -> Result<TransactGetItemsOutput> {
        let metas = self
            .metas_for(input.transact_items.iter().map(|leg| &leg.get.table_name))
            .await?;
        let mut tx = self.storage.begin().await?;
        let mut responses = Vec::with_capacity(input.transact_items.len());
        let mut consumed_capacity = Vec::new();

        for leg in &input.transact_items {
            let get = &leg.get;
            let meta = &metas[&get.table_name];
            let projection = parse_optional_projection(
                get.projection_expression.as_deref(),
                &get.expression_attribute_names,
            )?;
            let item = self.get_plain(&mut *tx, meta, &get.key).await?;
            if let Some(capacity) = consumed(
                meta,
                input.return_consumed_capacity,
                capacity::read_units(item.as_ref())?,
            ) {
                consumed_capacity.push(capacity);
            }
            responses.push(ItemResponse {
                item: item.map(|item| match &projection {
                    Some(paths) => project_item(&item, paths),
                    None => item,
                }),
            });
        }
        tx.commit().await?;

        Ok(TransactGetItemsOutput {
            responses,
            consumed_capacity,
        })
    }

    /// Execute every leg inside one transaction; a failed condition
    /// cancels the whole transaction, naming the failing leg.
    pub async fn transact_write(
        &self,
        input: TransactWriteItemsInput,
    ) -> Result<TransactWriteItemsOutput> {
        let mut reasons: Vec<CancellationReason> = input
            .transact_items
            .iter()
            .map(|_| CancellationReason::none())
            .collect();
        let mut consumed_capacity = Vec::new();

        let metas = self
            .metas_for(input.transact_items.iter().filter_map(leg_table_name))
            .await?;
        let mut tx = self.storage.begin().await?;
        for (position, leg) in input.transact_items.iter().enumerate() {
            match self
                .transact_leg(&mut *tx, leg, &metas, input.return_consumed_capacity, &mut consumed_capacity)
                .await
            {
                Ok(()) => {}
                Err(EngineError::ConditionalCheckFailed) => {
                    reasons[position] = CancellationReason {
                        code: "ConditionalCheckFailed".to_string(),
                        message: Some("The conditional request failed".to_string()),
                    };
                    return Err(EngineError::TransactionCanceled(reasons));
                }
                Err(other) => return Err(other),
            }
        }
        tx.commit().await?;

        Ok(TransactWriteItemsOutput { consumed_capacity })
    }

    async fn transact_leg(
        &self,
        conn: &mut AnyConnection,
        leg: &TransactWriteItem,
        metas: &HashMap<String, TableMetadata>,
        capacity_mode: ReturnConsumedCapacity,
        consumed_capacity: &mut Vec<ConsumedCapacity>,
    ) -> Result<()> {
        if let Some(put) = &leg.put {
            let meta = &metas[&put.table_name];
            let condition = parse_optional_condition(
                put.condition_expression.as_deref(),
                &put.expression_attribute_names,
                &put.expression_attribute_values,
            )?;
            self.put_in_tx(conn, meta, &put.item, condition.as_ref()).await?;
            if let Some(capacity) = consumed(
                meta,
                capacity_mode,
                capacity::write_units(Some(&put.item))?,
            ) {
                consumed_capacity.push(capacity);
            }
        } else if let Some(update) = &leg.update {
            let meta = &metas[&update.table_name];
            let parsed = parse_update(
                &update.update_expression,
                &update.expression_attribute_names,
                &update.expression_attribute_values,
            )?;
            let condition = parse_optional_condition(
                update.condition_expression.as_deref(),
                &update.expression_attribute_names,
                &update.expression_attribute_values,
            )?;
            let (_, new) = self
                .update_in_tx(conn, meta, &update.key, Some(&parsed), condition.as_ref())
                .await?;
            if let Some(capacity) =
                consumed(meta, capacity_mode, capacity::write_units(Some(&new))?)
            {
                consumed_capacity.push(capacity);
            }
        } else if let Some(delete) = &leg.delete {
            let meta = &metas[&delete.table_name];
            let condition = parse_optional_condition(
                delete.condition_expression.as_deref(),
                &delete.expression_attribute_names,
                &delete.expression_attribute_values,
            )?;
            let old = self
                .delete_in_tx(conn, meta, &delete.key, condition.as_ref())
                .await?;
            if let Some(capacity) =
                consumed(meta, capacity_mode, capacity::write_units(old.as_ref())?)
            {
                consumed_capacity.push(capacity);
            }
        } else if let Some(check) = &leg.condition_check {
            let meta = &metas[&check.table_name];
            let condition = parse_condition(
                &check.condition_expression,
                &check.expression_attribute_names,
                &check.expression_attribute_values,
            )?;
            let current = self.get_plain(conn, meta, &check.key).await?;
            if !condition.evaluate(current.as_ref()) {
                return Err(EngineError::ConditionalCheckFailed);
            }
        } else {
            return Err(EngineError::Validation(
                "a transact item must carry exactly one of Put, Update, Delete or ConditionCheck"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Delete driven by the TTL expirer: same path as a client delete, so
    /// index mirrors are maintained and a REMOVE record is captured.
    pub(crate) async fn delete_expired(&self, meta: &TableMetadata, key: Item) -> Result<bool> {
        let mut tx = self.storage.begin().await?;
        let old = self.delete_in_tx(&mut *tx, meta, &key, None).await?;
        tx.commit().await?;
        Ok(old.is_some())
    }

    /// One metadata fetch per distinct table, done before the
    /// transaction opens so the transaction holds the only connection.
    async fn metas_for(
        &self,
        names: impl Iterator<Item = &String>,
    ) -> Result<HashMap<String, TableMetadata>> {
        let mut metas = HashMap::new();
        for name in names {
            if !metas.contains_key(name) {
                metas.insert(name.clone(), self.tables.metadata(name).await?);
            }
        }
        Ok(metas)
    }

    async fn put_in_tx(
        &self,
        conn: &mut AnyConnection,
        meta: &TableMetadata,
        item: &Item,
        condition: Option<&ConditionExpression>,
    ) -> Result<Option<Item>> {
        attr::validate_item(item)?;
        let (hash, sort) = item_key_strings(meta, item)?;
        let relation = schema::item_table(&meta.table_name);
        let dialect = self.storage.dialect();

        let old_row = items::get(conn, dialect, &relation, &hash, &sort).await?;
        let old_plain = match &old_row {
            Some(row) => Some(self.decode_plain(meta, &row.attributes)?),
            None => None,
        };
        if let Some(condition) = condition {
            if !condition.evaluate(old_plain.as_ref()) {
                return Err(EngineError::ConditionalCheckFailed);
            }
        }

        let stored = self.encryptor.encrypt_on_write(meta, item)?;
        let stored_json = attr::to_json(&stored)?;
        items::upsert(
            conn,
            dialect,
            &relation,
            &ItemRow {
                hash_value: hash.clone(),
                sort_value: sort.clone(),
                attributes: stored_json.clone(),
            },
            Utc::now().timestamp_millis(),
        )
        .await?;
        self.sync_mirrors(conn, meta, &hash, &sort, Some(&stored)).await?;

        let operation = if old_row.is_some() {
            OperationType::Modify
        } else {
            OperationType::Insert
        };
        capture(
            conn,
            dialect,
            meta,
            operation,
            &hash,
            meta.sort_key.as_ref().map(|_| sort.as_str()),
            &key_item(meta, item),
            old_row.as_ref().map(|row| row.attributes.as_str()),
            Some(&stored_json),
        )
        .await?;

        Ok(old_plain)
    }

    async fn update_in_tx(
        &self,
        conn: &mut AnyConnection,
        meta: &TableMetadata,
        key: &Item,
        update: Option<&UpdateExpression>,
        condition: Option<&ConditionExpression>,
    ) -> Result<(Option<Item>, Item)> {
        let (hash, sort) = key_map_strings(meta, key)?;
        let relation = schema::item_table(&meta.table_name);
        let dialect = self.storage.dialect();

        let old_row = items::get(conn, dialect, &relation, &hash, &sort).await?;
        let old_plain = match &old_row {
            Some(row) => Some(self.decode_plain(meta, &row.attributes)?),
            None => None,
        };
        if let Some(condition) = condition {
            if !condition.evaluate(old_plain.as_ref()) {
                return Err(EngineError::ConditionalCheckFailed);
            }
        }

        let mut new_plain = old_plain.clone().unwrap_or_default();
        if let Some(update) = update {
            update.apply(&mut new_plain)?;
        }
        for (name, value) in key {
            match new_plain.get(name) {
                Some(existing) if existing != value => {
                    return Err(EngineError::Validation(format!(
                        "key attribute {} cannot be updated",
                        name
                    )));
                }
                _ => {
                    new_plain.insert(name.clone(), value.clone());
                }
            }
        }
        attr::validate_item(&new_plain)?;

        let stored = self.encryptor.encrypt_on_write(meta, &new_plain)?;
        let stored_json = attr::to_json(&stored)?;
        items::upsert(
            conn,
            dialect,
            &relation,
            &ItemRow {
                hash_value: hash.clone(),
                sort_value: sort.clone(),
                attributes: stored_json.clone(),
            },
            Utc::now().timestamp_millis(),
        )
        .await?;
        self.sync_mirrors(conn, meta, &hash, &sort, Some(&stored)).await?;

        let operation = if old_row.is_some() {
            OperationType::Modify
        } else {
            OperationType::Insert
        };
        capture(
            conn,
            dialect,
            meta,
            operation,
            &hash,
            meta.sort_key.as_ref().map(|_| sort.as_str()),
            &key_item(meta, &new_plain),
            old_row.as_ref().map(|row| row.attributes.as_str()),
            Some(&stored_json),
        )
        .await?;

        Ok((old_plain, new_plain))
    }

    async fn delete_in_tx(
        &self,
        conn: &mut AnyConnection,
        meta: &TableMetadata,
        key: &Item,
        condition: Option<&ConditionExpression>,
    ) -> Result<Option<Item>> {
        let (hash, sort) = key_map_strings(meta, key)?;
        let relation = schema::item_table(&meta.table_name);
        let dialect = self.storage.dialect();

        let old_row = items::get(conn, dialect, &relation, &hash, &sort).await?;
        let old_plain = match &old_row {
            Some(row) => Some(self.decode_plain(meta, &row.attributes)?),
            None => None,
        };
        if let Some(condition) = condition {
            if !condition.evaluate(old_plain.as_ref()) {
                return Err(EngineError::ConditionalCheckFailed);
            }
        }

        if let Some(row) = &old_row {
            items::delete(conn, dialect, &relation, &hash, &sort).await?;
            self.sync_mirrors(conn, meta, &hash, &sort, None).await?;
            capture(
                conn,
                dialect,
                meta,
                OperationType::Remove,
                &hash,
                meta.sort_key.as_ref().map(|_| sort.as_str()),
                &key_item(meta, key),
                Some(row.attributes.as_str()),
                None,
            )
            .await?;
        }

        Ok(old_plain)
    }

    /// Delete-then-insert mirror maintenance: the item's rows in every
    /// index mirror are replaced on each write, which also covers writes
    /// that mutate a mirrored key attribute.
    async fn sync_mirrors(
        &self,
        conn: &mut AnyConnection,
        meta: &TableMetadata,
        hash: &str,
        sort: &str,
        stored: Option<&Item>,
    ) -> Result<()> {
        let dialect = self.storage.dialect();
        for index in &meta.global_secondary_indexes {
            let relation = schema::gsi_table(&meta.table_name, &index.index_name);
            items::gsi_delete_base(conn, dialect, &relation, hash, sort).await?;
            if let Some(item) = stored {
                if let Some(row) = mirror_row(meta, index, item, hash, sort)? {
                    items::gsi_insert(conn, dialect, &relation, &row).await?;
                }
            }
        }
        Ok(())
    }

    async fn write_one(&self, meta: &TableMetadata, kind: WriteKind<'_>) -> Result<()> {
        let mut tx = self.storage.begin().await?;
        match kind {
            WriteKind::Put(item) => {
                self.put_in_tx(&mut *tx, meta, item, None).await?;
            }
            WriteKind::Delete(key) => {
                self.delete_in_tx(&mut *tx, meta, key, None).await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_plain(
        &self,
        conn: &mut AnyConnection,
        meta: &TableMetadata,
        key: &Item,
    ) -> Result<Option<Item>> {
        let (hash, sort) = key_map_strings(meta, key)?;
        let relation = schema::item_table(&meta.table_name);
        let row = items::get(conn, self.storage.dialect(), &relation, &hash, &sort).await?;
        match row {
            Some(row) => Ok(Some(self.decode_plain(meta, &row.attributes)?)),
            None => Ok(None),
        }
    }

    fn decode_plain(&self, meta: &TableMetadata, json: &str) -> Result<Item> {
        let stored = attr::from_json(json)?;
        self.encryptor.decrypt_on_read(meta, stored)
    }
}

fn leg_table_name(leg: &TransactWriteItem) -> Option<&String> {
    leg.put
        .as_ref()
        .map(|p| &p.table_name)
        .or_else(|| leg.update.as_ref().map(|u| &u.table_name))
        .or_else(|| leg.delete.as_ref().map(|d| &d.table_name))
        .or_else(|| leg.condition_check.as_ref().map(|c| &c.table_name))
}

enum WriteKind<'a> {
    Put(&'a Item),
    Delete(&'a Item),
}

struct Candidate {
    sort: Option<AttributeValue>,
    base_hash: String,
    base_sort: String,
    stored: Item,
}

fn parse_optional_condition(
    expr: Option<&str>,
    names: &HashMap<String, String>,
    values: &Item,
) -> Result<Option<ConditionExpression>> {
    expr.map(|expr| parse_condition(expr, names, values)).transpose()
}

fn parse_optional_projection(
    expr: Option<&str>,
    names: &HashMap<String, String>,
) -> Result<Option<Vec<String>>> {
    expr.map(|expr| parse_projection(expr, names)).transpose()
}

fn consumed(
    meta: &TableMetadata,
    mode: ReturnConsumedCapacity,
    units: f64,
) -> Option<ConsumedCapacity> {
    match mode {
        ReturnConsumedCapacity::None => None,
        _ => Some(ConsumedCapacity {
            table_name: Some(meta.table_name.clone()),
            capacity_units: units,
            read_capacity_units: None,
            write_capacity_units: None,
        }),
    }
}

fn check_key_type(
    declared: ScalarAttributeType,
    value: &AttributeValue,
    name: &str,
) -> Result<()> {
    let matches = matches!(
        (declared, value),
        (ScalarAttributeType::S, AttributeValue::S(_))
            | (ScalarAttributeType::N, AttributeValue::N(_))
            | (ScalarAttributeType::B, AttributeValue::B(_))
    );
    if matches {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "key attribute {} does not match its declared type",
            name
        )))
    }
}

fn key_string_of(value: &AttributeValue) -> Result<String> {
    value
        .key_string()
        .ok_or_else(|| EngineError::Internal("key value is not scalar".to_string()))
}

/// Extract and type-check the key strings from an item carrying at least
/// the key attributes.
fn item_key_strings(meta: &TableMetadata, item: &Item) -> Result<(String, String)> {
    let hash = attr::extract_key_value(item, &meta.hash_key)?;
    check_key_type(meta.hash_key_type, hash, &meta.hash_key)?;
    let hash = key_string_of(hash)?;
    let sort = match (&meta.sort_key, meta.sort_key_type) {
        (Some(name), Some(declared)) => {
            let value = attr::extract_key_value(item, name)?;
            check_key_type(declared, value, name)?;
            key_string_of(value)?
        }
        _ => String::new(),
    };
    Ok((hash, sort))
}

/// Like [`item_key_strings`], but for a key map, which must name exactly
/// the key attributes.
fn key_map_strings(meta: &TableMetadata, key: &Item) -> Result<(String, String)> {
    let expected = 1 + usize::from(meta.sort_key.is_some());
    if key.len() != expected {
        return Err(EngineError::Validation(
            "the provided key does not match the table's key schema".to_string(),
        ));
    }
    item_key_strings(meta, key)
}

fn key_item(meta: &TableMetadata, item: &Item) -> Item {
    let mut keys = Item::new();
    if let Some(value) = item.get(&meta.hash_key) {
        keys.insert(meta.hash_key.clone(), value.clone());
    }
    if let Some(name) = &meta.sort_key {
        if let Some(value) = item.get(name) {
            keys.insert(name.clone(), value.clone());
        }
    }
    keys
}

/// The continuation key handed back to the client: the table's primary
/// key, plus the index keys when the read ran over an index.
fn last_evaluated_from(
    meta: &TableMetadata,
    index: Option<&IndexMetadata>,
    stored: &Item,
) -> Item {
    let mut names: Vec<&String> = vec![&meta.hash_key];
    if let Some(sort) = &meta.sort_key {
        names.push(sort);
    }
    if let Some(index) = index {
        names.push(&index.hash_key);
        if let Some(sort) = &index.sort_key {
            names.push(sort);
        }
    }
    names
        .into_iter()
        .filter_map(|name| stored.get(name).map(|value| (name.clone(), value.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> TableMetadata {
        TableMetadata {
            table_name: "Events".into(),
            hash_key: "userId".into(),
            hash_key_type: ScalarAttributeType::S,
            sort_key: Some("ts".into()),
            sort_key_type: Some(ScalarAttributeType::S),
            global_secondary_indexes: Vec::new(),
            ttl_attribute: None,
            ttl_enabled: false,
            stream_enabled: false,
            stream_view_type: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn key_map_must_match_the_schema() {
        let mut key = Item::new();
        key.insert("userId".into(), AttributeValue::S("u1".into()));
        assert!(key_map_strings(&meta(), &key).is_err());

        key.insert("ts".into(), AttributeValue::S("2024-01-01".into()));
        let (hash, sort) = key_map_strings(&meta(), &key).unwrap();
        assert_eq!(("u1".to_string(), "2024-01-01".to_string()), (hash, sort));

        key.insert("extra".into(), AttributeValue::S("x".into()));
        assert!(key_map_strings(&meta(), &key).is_err());
    }

    #[test]
    fn key_values_must_match_declared_types() {
        let mut key = Item::new();
        key.insert("userId".into(), AttributeValue::N("7".into()));
        key.insert("ts".into(), AttributeValue::S("2024-01-01".into()));
        assert!(key_map_strings(&meta(), &key).is_err());
    }

    #[test]
    fn last_evaluated_key_carries_index_keys() {
        let index = IndexMetadata {
            index_name: "by-kind".into(),
            hash_key: "kind".into(),
            sort_key: None,
            projection_type: pretender_model::table::ProjectionType::All,
            non_key_attributes: Vec::new(),
        };
        let mut stored = Item::new();
        stored.insert("userId".into(), AttributeValue::S("u1".into()));
        stored.insert("ts".into(), AttributeValue::S("2024-01-01".into()));
        stored.insert("kind".into(), AttributeValue::S("click".into()));
        stored.insert("payload".into(), AttributeValue::S("x".into()));

        let key = last_evaluated_from(&meta(), Some(&index), &stored);
        assert_eq!(3, key.len());
        assert!(key.contains_key("kind"));
        assert!(!key.contains_key("payload"));
    }
}
