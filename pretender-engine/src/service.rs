//! The typed operation façade.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

use pretender_model::ops::item::{
    BatchGetItemInput, BatchGetItemOutput, BatchWriteItemInput, BatchWriteItemOutput,
    DeleteItemInput, DeleteItemOutput, GetItemInput, GetItemOutput, PutItemInput, PutItemOutput,
    QueryInput, QueryOutput, ScanInput, ScanOutput, TransactGetItemsInput, TransactGetItemsOutput,
    TransactWriteItemsInput, TransactWriteItemsOutput, UpdateItemInput, UpdateItemOutput,
};
use pretender_model::ops::stream::{
    DescribeStreamInput, DescribeStreamOutput, GetRecordsInput, GetRecordsOutput,
    GetShardIteratorInput, GetShardIteratorOutput, ListStreamsInput, ListStreamsOutput,
};
use pretender_model::ops::table::{
    CreateTableInput, CreateTableOutput, DeleteTableInput, DeleteTableOutput, DescribeTableInput,
    DescribeTableOutput, ListTablesInput, ListTablesOutput, UpdateTableInput, UpdateTableOutput,
    UpdateTimeToLiveInput, UpdateTimeToLiveOutput,
};

use crate::config::{Config, TableEncryptionConfig};
use crate::crypto::{AttributeEncryptor, EncryptionCore};
use crate::error::{EngineError, Result};
use crate::item::ItemManager;
use crate::retention::{self, RetentionConfig, RetentionHandle};
use crate::storage::Storage;
use crate::stream::StreamManager;
use crate::table::TableManager;

/// The engine façade: one typed method per client operation.
///
/// Routes each request to its manager, bounds it by the configured
/// per-request deadline, and surfaces the [`EngineError`] taxonomy; a
/// front-end turns outputs and errors into wire JSON unchanged.
#[derive(Clone, Debug)]
pub struct Pretender {
    storage: Arc<Storage>,
    tables: Arc<TableManager>,
    items: Arc<ItemManager>,
    streams: StreamManager,
    encryptor: Arc<AttributeEncryptor>,
    retention: RetentionConfig,
    request_timeout: Option<Duration>,
}

impl Pretender {
    /// Connect to storage and assemble the engine.
    pub async fn new(config: Config) -> Result<Self> {
        let storage = Arc::new(
            Storage::connect(&config.connection_url(), config.database.max_connections).await?,
        );
        if config.run_migrations {
            storage.migrate().await?;
        }

        let core = match config.master_key_bytes()? {
            Some(key) => EncryptionCore::new(&key)?,
            None => {
                warn!(
                    "no masterKey configured; generated a random per-process key - \
                     attributes encrypted under it are unreadable after a restart"
                );
                EncryptionCore::generate()
            }
        };
        let encryptor = Arc::new(AttributeEncryptor::new(core.clone(), &config.encryption.tables));
        let tables = Arc::new(TableManager::new(Arc::clone(&storage)));
        let items = Arc::new(ItemManager::new(
            Arc::clone(&storage),
            Arc::clone(&tables),
            Arc::clone(&encryptor),
        ));
        let streams = StreamManager::new(
            Arc::clone(&storage),
            Arc::clone(&tables),
            Arc::clone(&encryptor),
            &core,
        );

        Ok(Pretender {
            storage,
            tables,
            items,
            streams,
            encryptor,
            retention: RetentionConfig::from(&config),
            request_timeout: config.request_timeout_millis.map(Duration::from_millis),
        })
    }

    /// Start the TTL expirer and stream trimmer.
    pub fn start_retention(&self) -> RetentionHandle {
        retention::spawn(
            Arc::clone(&self.storage),
            Arc::clone(&self.tables),
            Arc::clone(&self.items),
            self.retention.clone(),
        )
    }

    /// Install or replace one table's attribute-encryption config,
    /// validating it against the table's key schema.
    pub async fn configure_encryption(&self, config: &TableEncryptionConfig) -> Result<()> {
        let meta = self.tables.metadata(&config.table_name).await?;
        self.encryptor.configure(&meta, config)
    }

    async fn bounded<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        match self.request_timeout {
            Some(deadline) => tokio::time::timeout(deadline, operation)
                .await
                .map_err(|_| EngineError::RequestTimeout)?,
            None => operation.await,
        }
    }

    pub async fn create_table(&self, input: CreateTableInput) -> Result<CreateTableOutput> {
        trace!(table = %input.table_name, "CreateTable");
        self.bounded(self.tables.create_table(input)).await
    }

    pub async fn describe_table(&self, input: DescribeTableInput) -> Result<DescribeTableOutput> {
        trace!(table = %input.table_name, "DescribeTable");
        self.bounded(self.tables.describe_table(input)).await
    }

    pub async fn list_tables(&self, input: ListTablesInput) -> Result<ListTablesOutput> {
        trace!("ListTables");
        self.bounded(self.tables.list_tables(input)).await
    }

    pub async fn delete_table(&self, input: DeleteTableInput) -> Result<DeleteTableOutput> {
        trace!(table = %input.table_name, "DeleteTable");
        self.bounded(self.tables.delete_table(input)).await
    }

    pub async fn update_table(&self, input: UpdateTableInput) -> Result<UpdateTableOutput> {
        trace!(table = %input.table_name, "UpdateTable");
        self.bounded(self.tables.update_table(input)).await
    }

    pub async fn update_time_to_live(
        &self,
        input: UpdateTimeToLiveInput,
    ) -> Result<UpdateTimeToLiveOutput> {
        trace!(table = %input.table_name, "UpdateTimeToLive");
        self.bounded(self.tables.update_time_to_live(input)).await
    }

    pub async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput> {
        trace!(table = %input.table_name, "PutItem");
        self.bounded(self.items.put_item(input)).await
    }

    pub async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput> {
        trace!(table = %input.table_name, "GetItem");
        self.bounded(self.items.get_item(input)).await
    }

    pub async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput> {
        trace!(table = %input.table_name, "UpdateItem");
        self.bounded(self.items.update_item(input)).await
    }

    pub async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput> {
        trace!(table = %input.table_name, "DeleteItem");
        self.bounded(self.items.delete_item(input)).await
    }

    pub async fn query(&self, input: QueryInput) -> Result<QueryOutput> {
        trace!(table = %input.table_name, "Query");
        self.bounded(self.items.query(input)).await
    }

    pub async fn scan(&self, input: ScanInput) -> Result<ScanOutput> {
        trace!(table = %input.table_name, "Scan");
        self.bounded(self.items.scan(input)).await
    }

    pub async fn batch_get_item(&self, input: BatchGetItemInput) -> Result<BatchGetItemOutput> {
        trace!(tables = input.request_items.len(), "BatchGetItem");
        self.bounded(self.items.batch_get(input)).await
    }

    pub async fn batch_write_item(&self, input: BatchWriteItemInput) -> Result<BatchWriteItemOutput> {
        trace!(tables = input.request_items.len(), "BatchWriteItem");
        self.bounded(self.items.batch_write(input)).await
    }

    pub async fn transact_get_items(
        &self,
        input: TransactGetItemsInput,
    ) -> Result<TransactGetItemsOutput> {
        trace!(legs = input.transact_items.len(), "TransactGetItems");
        self.bounded(self.items.transact_get(input)).await
    }

    pub async fn transact_write_items(
        &self,
        input: TransactWriteItemsInput,
    ) -> Result<TransactWriteItemsOutput> {
        trace!(legs = input.transact_items.len(), "TransactWriteItems");
        self.bounded(self.items.transact_write(input)).await
    }

    pub async fn list_streams(&self, input: ListStreamsInput) -> Result<ListStreamsOutput> {
        trace!("ListStreams");
        self.bounded(self.streams.list_streams(input)).await
    }

    pub async fn describe_stream(&self, input: DescribeStreamInput) -> Result<DescribeStreamOutput> {
        trace!(stream = %input.stream_arn, "DescribeStream");
        self.bounded(self.streams.describe_stream(input)).await
    }

    pub async fn get_shard_iterator(
        &self,
        input: GetShardIteratorInput,
    ) -> Result<GetShardIteratorOutput> {
        trace!(stream = %input.stream_arn, "GetShardIterator");
        self.bounded(self.streams.get_shard_iterator(input)).await
    }

    pub async fn get_records(&self, input: GetRecordsInput) -> Result<GetRecordsOutput> {
        trace!("GetRecords");
        self.bounded(self.streams.get_records(input)).await
    }
}
