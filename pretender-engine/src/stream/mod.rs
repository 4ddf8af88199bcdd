//! Change-data capture and the stream read surface.
//!
//! Capture runs inside the transaction that commits the mutation: the
//! record and the row change land together or not at all, and the
//! sequence counter advances under the same row lock, so records are
//! dense and strictly ordered per table.

use chrono::{TimeZone, Utc};
use sqlx::AnyConnection;
use std::sync::Arc;

use pretender_model::attr::{self, Item};
use pretender_model::ops::stream::{
    DescribeStreamInput, DescribeStreamOutput, GetRecordsInput, GetRecordsOutput,
    GetShardIteratorInput, GetShardIteratorOutput, ListStreamsInput, ListStreamsOutput,
};
use pretender_model::ops::table::KeySchemaElement;
use pretender_model::stream::{
    OperationType, SequenceNumberRange, Shard, ShardIteratorType, StreamDescription, StreamRecord,
    StreamRecordDetail, StreamStatus, StreamSummary,
};
use pretender_model::table::{table_name_from_stream_arn, KeyType, TableMetadata};

use crate::crypto::{AttributeEncryptor, EncryptionCore};
use crate::error::{EngineError, Result};
use crate::storage::streams::{self, StreamRow};
use crate::storage::{metadata, schema, Dialect, Storage};
use crate::table::TableManager;

mod iterator;

pub use iterator::SHARD_ID;
pub(crate) use iterator::{IteratorCodec, IteratorPayload};

/// Records fetched by one GetRecords call, and the hard cap on its limit.
const MAX_RECORDS_PER_FETCH: i64 = 1000;

/// Append the change record for one committed mutation, inside the
/// mutating transaction. Images follow the table's StreamViewType.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn capture(
    conn: &mut AnyConnection,
    dialect: Dialect,
    meta: &TableMetadata,
    operation: OperationType,
    hash: &str,
    sort: Option<&str>,
    keys: &Item,
    old_json: Option<&str>,
    new_json: Option<&str>,
) -> Result<()> {
    if !meta.stream_enabled {
        return Ok(());
    }
    let view = meta
        .stream_view_type
        .ok_or_else(|| EngineError::Internal("stream enabled without a view type".to_string()))?;

    let seq = metadata::next_stream_seq(conn, dialect, &meta.table_name).await?;
    let old_image = match operation {
        OperationType::Insert => None,
        _ if view.wants_old_image() => old_json,
        _ => None,
    };
    let new_image = match operation {
        OperationType::Remove => None,
        _ if view.wants_new_image() => new_json,
        _ => None,
    };
    let keys_json = attr::to_json(keys)?;
    let size_bytes = new_image.or(old_image).unwrap_or(&keys_json).len() as i64;

    let row = StreamRow {
        seq,
        event_id: uuid::Uuid::new_v4().to_string(),
        event_type: operation.to_string(),
        hash_value: hash.to_string(),
        sort_value: sort.map(str::to_string),
        keys_json,
        old_image: old_image.map(str::to_string),
        new_image: new_image.map(str::to_string),
        size_bytes,
        created_at: Utc::now().timestamp_millis(),
    };
    streams::append(conn, dialect, &schema::stream_table(&meta.table_name), &row).await
}

/// Serves the stream read surface: ListStreams, DescribeStream,
/// GetShardIterator, and GetRecords.
#[derive(Clone, Debug)]
pub struct StreamManager {
    storage: Arc<Storage>,
    tables: Arc<TableManager>,
    encryptor: Arc<AttributeEncryptor>,
    codec: IteratorCodec,
}

impl StreamManager {
    pub fn new(
        storage: Arc<Storage>,
        tables: Arc<TableManager>,
        encryptor: Arc<AttributeEncryptor>,
        core: &EncryptionCore,
    ) -> Self {
        StreamManager {
            storage,
            tables,
            encryptor,
            codec: IteratorCodec::new(core),
        }
    }

    pub async fn list_streams(&self, input: ListStreamsInput) -> Result<ListStreamsOutput> {
        let limit = match input.limit {
            Some(0) => return Err(EngineError::Validation("Limit must be at least 1".to_string())),
            Some(n) => n as usize,
            None => 100,
        };
        let mut streams: Vec<StreamSummary> = self
            .tables
            .all_metadata()
            .await?
            .into_iter()
            .filter(|meta| meta.stream_enabled)
            .filter(|meta| {
                input
                    .table_name
                    .as_ref()
                    .map_or(true, |name| name == &meta.table_name)
            })
            .filter_map(|meta| {
                meta.stream_arn().map(|stream_arn| StreamSummary {
                    stream_arn,
                    table_name: meta.table_name.clone(),
                    stream_label: meta.stream_label(),
                })
            })
            .collect();

        if let Some(start_arn) = &input.exclusive_start_stream_arn {
            if let Some(position) = streams.iter().position(|s| &s.stream_arn == start_arn) {
                streams.drain(..=position);
            }
        }
        let last_evaluated_stream_arn = if streams.len() > limit {
            streams.truncate(limit);
            streams.last().map(|s| s.stream_arn.clone())
        } else {
            None
        };

        Ok(ListStreamsOutput {
            streams,
            last_evaluated_stream_arn,
        })
    }

    pub async fn describe_stream(&self, input: DescribeStreamInput) -> Result<DescribeStreamOutput> {
        let meta = self.stream_table_meta(&input.stream_arn).await?;
        let view = meta
            .stream_view_type
            .ok_or_else(|| EngineError::ResourceNotFound(input.stream_arn.clone()))?;

        let mut conn = self.storage.acquire().await?;
        let bounds = streams::bounds(&mut conn, &schema::stream_table(&meta.table_name)).await?;

        let mut key_schema = vec![KeySchemaElement {
            attribute_name: meta.hash_key.clone(),
            key_type: KeyType::Hash,
        }];
        if let Some(sort) = &meta.sort_key {
            key_schema.push(KeySchemaElement {
                attribute_name: sort.clone(),
                key_type: KeyType::Range,
            });
        }

        Ok(DescribeStreamOutput {
            stream_description: StreamDescription {
                stream_arn: input.stream_arn,
                table_name: meta.table_name.clone(),
                stream_label: meta.stream_label(),
                stream_status: StreamStatus::Enabled,
                stream_view_type: view,
                key_schema,
                shards: vec![Shard {
                    shard_id: SHARD_ID.to_string(),
                    sequence_number_range: SequenceNumberRange {
                        starting_sequence_number: Some(
                            bounds.map_or(1, |(lo, _)| lo).to_string(),
                        ),
                        ending_sequence_number: bounds.map(|(_, hi)| hi.to_string()),
                    },
                }],
                last_evaluated_shard_id: None,
            },
        })
    }

    pub async fn get_shard_iterator(
        &self,
        input: GetShardIteratorInput,
    ) -> Result<GetShardIteratorOutput> {
        let meta = self.stream_table_meta(&input.stream_arn).await?;
        if input.shard_id != SHARD_ID {
            return Err(EngineError::ResourceNotFound(format!(
                "shard {} not found",
                input.shard_id
            )));
        }

        let dialect = self.storage.dialect();
        let mut conn = self.storage.acquire().await?;
        let relation = schema::stream_table(&meta.table_name);
        let bounds = streams::bounds(&mut conn, &relation).await?;
        let last_trim = metadata::last_trim_at(&mut conn, dialect, &meta.table_name).await?;

        let sequence_number = match input.shard_iterator_type {
            ShardIteratorType::TrimHorizon => None,
            ShardIteratorType::Latest => Some(bounds.map_or(0, |(_, hi)| hi)),
            ShardIteratorType::AtSequenceNumber | ShardIteratorType::AfterSequenceNumber => {
                let requested: i64 = input
                    .sequence_number
                    .as_deref()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| {
                        EngineError::Validation(
                            "SequenceNumber is required for AT/AFTER iterators".to_string(),
                        )
                    })?;
                let trimmed = match bounds {
                    Some((lo, _)) => requested < lo && last_trim > 0,
                    None => last_trim > 0,
                };
                if trimmed {
                    return Err(EngineError::TrimmedDataAccess);
                }
                Some(requested)
            }
        };

        let payload = IteratorPayload {
            table_name: meta.table_name.clone(),
            shard_id: SHARD_ID.to_string(),
            iterator_type: input.shard_iterator_type,
            sequence_number,
            issued_at: Utc::now().timestamp_millis(),
        };
        Ok(GetShardIteratorOutput {
            shard_iterator: self.codec.encode(&payload)?,
        })
    }

    pub async fn get_records(&self, input: GetRecordsInput) -> Result<GetRecordsOutput> {
        let payload = self.codec.decode(&input.shard_iterator)?;
        let limit = match input.limit {
            Some(0) => return Err(EngineError::Validation("Limit must be at least 1".to_string())),
            Some(n) => (n as i64).min(MAX_RECORDS_PER_FETCH),
            None => MAX_RECORDS_PER_FETCH,
        };
        let meta = self
            .tables
            .metadata(&payload.table_name)
            .await
            .map_err(|_| EngineError::ResourceNotFound(payload.table_name.clone()))?;
        if !meta.stream_enabled {
            return Err(EngineError::ResourceNotFound(payload.table_name.clone()));
        }

        let dialect = self.storage.dialect();
        let mut conn = self.storage.acquire().await?;
        let last_trim = metadata::last_trim_at(&mut conn, dialect, &meta.table_name).await?;
        if payload.issued_at < last_trim {
            return Err(EngineError::ExpiredIterator);
        }

        let from_seq = match (payload.iterator_type, payload.sequence_number) {
            (ShardIteratorType::TrimHorizon, _) => 1,
            (ShardIteratorType::AtSequenceNumber, Some(seq)) => seq,
            (_, Some(seq)) => seq + 1,
            (_, None) => {
                return Err(EngineError::Validation("Invalid ShardIterator".to_string()))
            }
        };

        let relation = schema::stream_table(&meta.table_name);
        let rows = streams::fetch_from(&mut conn, dialect, &relation, from_seq, limit).await?;
        let next_cursor = rows
            .last()
            .map(|row| row.seq)
            .or(payload.sequence_number)
            .unwrap_or(0);

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(self.to_wire(&meta, row)?);
        }

        let next = IteratorPayload {
            table_name: meta.table_name.clone(),
            shard_id: SHARD_ID.to_string(),
            iterator_type: ShardIteratorType::AfterSequenceNumber,
            sequence_number: Some(next_cursor),
            issued_at: Utc::now().timestamp_millis(),
        };
        Ok(GetRecordsOutput {
            records,
            next_shard_iterator: Some(self.codec.encode(&next)?),
        })
    }

    async fn stream_table_meta(&self, stream_arn: &str) -> Result<TableMetadata> {
        let table = table_name_from_stream_arn(stream_arn)
            .ok_or_else(|| EngineError::Validation(format!("Invalid StreamArn: {}", stream_arn)))?;
        let meta = self.tables.metadata(table).await?;
        if !meta.stream_enabled {
            return Err(EngineError::ResourceNotFound(stream_arn.to_string()));
        }
        Ok(meta)
    }

    fn to_wire(&self, meta: &TableMetadata, row: StreamRow) -> Result<StreamRecord> {
        let view = meta
            .stream_view_type
            .ok_or_else(|| EngineError::Internal("stream enabled without a view type".to_string()))?;
        let event_name = match row.event_type.as_str() {
            "INSERT" => OperationType::Insert,
            "MODIFY" => OperationType::Modify,
            "REMOVE" => OperationType::Remove,
            other => {
                return Err(EngineError::Internal(format!(
                    "unknown stream event type {}",
                    other
                )))
            }
        };
        let keys = attr::from_json(&row.keys_json)?;
        let old_image = self.decode_image(meta, row.old_image.as_deref())?;
        let new_image = self.decode_image(meta, row.new_image.as_deref())?;
        let approximate_creation_date_time = Utc
            .timestamp_millis_opt(row.created_at)
            .latest()
            .ok_or_else(|| EngineError::Internal("stream record timestamp out of range".to_string()))?;

        Ok(StreamRecord {
            event_id: row.event_id,
            event_name,
            event_version: Some("1.1".to_string()),
            event_source: Some("aws:dynamodb".to_string()),
            event_source_arn: meta.stream_arn(),
            aws_region: "local".to_string(),
            change: StreamRecordDetail {
                approximate_creation_date_time,
                keys,
                new_image,
                old_image,
                sequence_number: row.seq.to_string(),
                size_bytes: row.size_bytes,
                stream_view_type: view,
            },
        })
    }

    /// Images are stored in the at-rest form; encrypted attributes open
    /// on the way out, same as item reads.
    fn decode_image(&self, meta: &TableMetadata, json: Option<&str>) -> Result<Option<Item>> {
        match json {
            Some(json) => {
                let stored = attr::from_json(json)?;
                Ok(Some(self.encryptor.decrypt_on_read(meta, stored)?))
            }
            None => Ok(None),
        }
    }
}
