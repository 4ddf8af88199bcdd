//! SQL storage. Every user table maps to a `pdb_item_<name>` relation,
//! each of its secondary indexes to a `pdb_item_<name>_gsi_<index>`
//! mirror, and its change log to `pdb_stream_<name>`. A central
//! `pdb_table_meta` relation holds table descriptors and the per-table
//! stream sequence counter.

use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyPool, Transaction};

use crate::error::{EngineError, Result};

pub mod items;
pub mod metadata;
pub mod schema;
pub mod streams;

/// The SQL dialects the engine can drive.
///
/// Both provide atomic multi-statement transactions, which the engine
/// depends on; backends that cannot are refused at connect time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme {
            "sqlite" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            other => Err(EngineError::Validation(format!(
                "unsupported database scheme '{}': a transactional sqlite or postgres URL is required",
                other
            ))),
        }
    }

    /// The bind-parameter placeholder for the n-th (1-based) argument.
    pub(crate) fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Sqlite => "?".to_string(),
            Dialect::Postgres => format!("${}", n),
        }
    }
}

/// Quote an identifier for interpolation into SQL. Relation names derive
/// from validated table and index names, so this is belt-and-braces for
/// the dot and dash characters those names may carry.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// The shared storage handle: a connection pool plus the dialect derived
/// from the connection URL.
#[derive(Clone, Debug)]
pub struct Storage {
    pool: AnyPool,
    dialect: Dialect,
}

impl Storage {
    /// Connect to the configured database.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        install_default_drivers();
        let dialect = Dialect::from_url(url)?;
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Storage { pool, dialect })
    }

    pub(crate) fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub(crate) async fn acquire(&self) -> Result<PoolConnection<Any>> {
        Ok(self.pool.acquire().await?)
    }

    pub(crate) async fn begin(&self) -> Result<Transaction<'static, Any>> {
        Ok(self.pool.begin().await?)
    }

    /// Provision the metadata relation. Invoked at startup when
    /// `runMigrations` is set; deployments with an external migration
    /// runner skip this and the engine merely verifies the relation
    /// exists on first use.
    pub async fn migrate(&self) -> Result<()> {
        let mut conn = self.acquire().await?;
        schema::create_meta_table(&mut conn).await
    }
}
