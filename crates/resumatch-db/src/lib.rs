//! # resumatch-db
//!
//! Storage layer for resumatch.
//!
//! This crate provides:
//! - Connection pool management
//! - [`PgResultStore`]: resume records with pgvector embeddings
//! - [`PgJobRepository`]: the durable match-job queue
//! - In-memory equivalents of both, for tests and single-process runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use resumatch_db::{Database, ResultStore, ResumeFields};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/resumatch", 384).await?;
//!     let id = resumatch_db::new_v7();
//!     db.resumes
//!         .upsert(id, ResumeFields::new().original_filename("cv.txt"))
//!         .await?;
//!     Ok(())
//! }
//! ```
pub mod jobs;
pub mod memory;
pub mod pool;
pub mod resumes;

// Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

use std::sync::Arc;

// Re-export core types
pub use resumatch_core::*;

pub use jobs::PgJobRepository;
pub use memory::{MemoryJobRepository, MemoryResultStore};
pub use pool::{create_pool, log_pool_metrics, PoolConfig};
pub use resumes::PgResultStore;

/// PostgreSQL-backed stores sharing one pool.
pub struct Database {
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub resumes: PgResultStore,
    pub jobs: PgJobRepository,
}

impl Database {
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>, dimension: usize) -> Self {
        Self {
            resumes: PgResultStore::new(pool.clone(), dimension),
            jobs: PgJobRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect with [`PoolConfig::from_env`].
    pub async fn connect(url: &str, dimension: usize) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool, dimension))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

/// Which store implementation a process runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

impl StoreKind {
    /// Read `RESUMATCH_STORE` (`postgres` or `memory`, default `postgres`).
    pub fn from_env() -> Result<Self> {
        match std::env::var(defaults::ENV_STORE) {
            Ok(value) => Self::parse(&value),
            Err(_) => Ok(StoreKind::Postgres),
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(StoreKind::Postgres),
            "memory" | "mem" => Ok(StoreKind::Memory),
            other => Err(Error::Config(format!(
                "{} must be 'postgres' or 'memory', got '{other}'",
                defaults::ENV_STORE
            ))),
        }
    }
}

/// The two stores as trait objects, ready to share across tasks.
#[derive(Clone)]
pub struct Stores {
    pub results: Arc<dyn ResultStore>,
    pub jobs: Arc<dyn JobRepository>,
}

impl Stores {
    /// Fresh in-memory stores.
    pub fn memory(dimension: usize) -> Self {
        Self {
            results: Arc::new(MemoryResultStore::new(dimension)),
            jobs: Arc::new(MemoryJobRepository::new()),
        }
    }

    /// Open the stores for `kind`. `database_url` is required for Postgres;
    /// migrations run on connect.
    pub async fn open(kind: StoreKind, database_url: Option<&str>, dimension: usize) -> Result<Self> {
        match kind {
            StoreKind::Memory => Ok(Self::memory(dimension)),
            StoreKind::Postgres => {
                let url = database_url.ok_or_else(|| {
                    Error::Config(format!(
                        "{} is required for the postgres store",
                        defaults::ENV_DATABASE_URL
                    ))
                })?;
                let db = Database::connect(url, dimension).await?;
                #[cfg(feature = "migrations")]
                db.migrate().await?;
                Ok(Self {
                    results: Arc::new(db.resumes),
                    jobs: Arc::new(db.jobs),
                })
            }
        }
    }
}
