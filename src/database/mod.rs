use std::cmp::Ordering;
use std::ops::Deref;

use anyhow::{anyhow, Context, Error as ErrReport};
use sqlx::migrate::{Migrate, MigrateDatabase, Migrator};
use sqlx::pool::PoolOptions;
use sqlx::{Executor, Pool, Postgres};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::config::DatabaseConfig;

pub mod methods;
pub mod transaction;
pub mod types;

pub use methods::DbMethods;

// Statically link in migration files.
static MIGRATOR: Migrator = sqlx::migrate!("schemas/database");

/// A handle to the Postgres-backed store. Cheaply cloneable: it wraps a
/// connection pool, so every clone shares the same underlying connections.
#[derive(Clone)]
pub struct Database {
    pub pool: Pool<Postgres>,
}

impl Deref for Database {
    type Target = Pool<Postgres>;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

impl Database {
    #[instrument(skip_all)]
    pub async fn new(config: &DatabaseConfig) -> Result<Self, ErrReport> {
        info!(url = %&config.database, "Connecting to database");

        if config.migrate && !Postgres::database_exists(config.database.expose()).await? {
            warn!(url = %&config.database, "Database does not exist, creating it");
            Postgres::create_database(config.database.expose()).await?;
        }

        let pool = PoolOptions::<Postgres>::new()
            .max_connections(config.max_connections)
            .after_connect(|conn, _| {
                Box::pin(async move {
                    conn.execute("SET DEFAULT_TRANSACTION_ISOLATION TO 'SERIALIZABLE'")
                        .await?;
                    Ok(())
                })
            })
            .connect(config.database.expose())
            .await
            .context("error connecting to database")?;

        let version = pool
            .fetch_one("SELECT version()")
            .await
            .context("error getting database version")?
            .get::<String, _>(0);
        info!(url = %&config.database, ?version, "Connected to database");

        let latest = MIGRATOR
            .migrations
            .last()
            .expect("Missing migrations")
            .version;

        if config.migrate {
            info!(url = %&config.database, "Running migrations");
            MIGRATOR.run(&pool).await?;
        }

        let mut conn = pool.acquire().await?;

        if conn.dirty_version().await?.is_some() {
            error!(
                url = %&config.database,
                expected = latest,
                "Database is in an incomplete migration state",
            );
            return Err(anyhow!("Database is in an incomplete migration state"));
        }

        let version = conn
            .list_applied_migrations()
            .await?
            .last()
            .expect("Missing migrations")
            .version;

        match version.cmp(&latest) {
            Ordering::Less => {
                error!(
                    url = %&config.database,
                    version,
                    expected = latest,
                    "Database is not up to date, rerun with database.migrate = true",
                );
                return Err(anyhow!("Database is not up to date"));
            }
            Ordering::Greater => {
                error!(
                    url = %&config.database,
                    version,
                    latest,
                    "Database schema is newer than this binary understands, please update",
                );
                return Err(anyhow!("Database schema is newer than this binary"));
            }
            Ordering::Equal => {
                info!(url = %&config.database, version, "Database schema is up to date");
            }
        }

        Ok(Self { pool })
    }
}

/// Errors surfaced by the persistence layer. Callers above the database
/// module translate these into HTTP status codes (409 on `Conflict`, 404 on
/// `NotFound`, 503 on `Unavailable`).
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),

    #[error("database error: {0}")]
    Internal(#[from] sqlx::Error),
}

impl Error {
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Conflict(db_err.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => Self::Unavailable(err),
            _ => Self::Internal(err),
        }
    }
}
