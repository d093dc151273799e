// Postgres Cat Repository
//
// Durable store shared by every instance, so a restarted process (or a
// second one replaying the same event log) can still update and delete
// the cats its cache was rebuilt with.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime};
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use super::{CatRepository, RepositoryError};
use crate::model::{CatId, CatRecord};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS cats (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    age INTEGER NOT NULL CHECK (age >= 0),
    vaccinated BOOLEAN NOT NULL
)";

#[derive(Clone)]
pub struct PostgresCatRepository {
    pool: Pool,
}

impl PostgresCatRepository {
    /// Build a pool for `url` and make sure the `cats` table exists.
    pub async fn connect(url: &str, max_size: usize) -> Result<Self, RepositoryError> {
        let mut cfg = Config::new();
        cfg.url = Some(url.to_string());
        cfg.pool = Some(PoolConfig::new(max_size.max(1)));
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| RepositoryError::Backend(format!("failed to create pool: {e}")))?;

        let repository = Self { pool };
        repository.ensure_schema().await?;
        tracing::info!(max_size, "connected to postgres cat repository");
        Ok(repository)
    }

    async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        let conn = self.conn().await?;
        conn.batch_execute(SCHEMA)
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))
    }

    async fn conn(&self) -> Result<deadpool_postgres::Object, RepositoryError> {
        self.pool.get().await.map_err(map_pool_error)
    }
}

#[async_trait]
impl CatRepository for PostgresCatRepository {
    async fn get(&self, id: CatId) -> Result<CatRecord, RepositoryError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT id, name, age, vaccinated FROM cats WHERE id = $1",
                &[&id.0],
            )
            .await
            .map_err(|e| map_pg_error(id, e))?;

        match row {
            Some(row) => cat_from_row(&row),
            None => Err(RepositoryError::NotFound(id)),
        }
    }

    async fn create(&self, cat: &CatRecord) -> Result<(), RepositoryError> {
        let age = age_to_sql(cat.age)?;
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO cats (id, name, age, vaccinated) VALUES ($1, $2, $3, $4)",
            &[&cat.id.0, &cat.name, &age, &cat.vaccinated],
        )
        .await
        .map_err(|e| map_pg_error(cat.id, e))?;
        Ok(())
    }

    async fn update(&self, cat: &CatRecord) -> Result<(), RepositoryError> {
        let age = age_to_sql(cat.age)?;
        let conn = self.conn().await?;
        let changed = conn
            .execute(
                "UPDATE cats SET name = $1, age = $2, vaccinated = $3 WHERE id = $4",
                &[&cat.name, &age, &cat.vaccinated, &cat.id.0],
            )
            .await
            .map_err(|e| map_pg_error(cat.id, e))?;
        expect_one(changed, cat.id)
    }

    async fn delete(&self, id: CatId) -> Result<(), RepositoryError> {
        let conn = self.conn().await?;
        let changed = conn
            .execute("DELETE FROM cats WHERE id = $1", &[&id.0])
            .await
            .map_err(|e| map_pg_error(id, e))?;
        expect_one(changed, id)
    }
}

fn cat_from_row(row: &Row) -> Result<CatRecord, RepositoryError> {
    let backend = |e: tokio_postgres::Error| RepositoryError::Backend(e.to_string());
    let id: Uuid = row.try_get("id").map_err(backend)?;
    let age: i32 = row.try_get("age").map_err(backend)?;
    Ok(CatRecord {
        id: CatId(id),
        name: row.try_get("name").map_err(backend)?,
        age: age_from_sql(age)?,
        vaccinated: row.try_get("vaccinated").map_err(backend)?,
    })
}

fn age_to_sql(age: u32) -> Result<i32, RepositoryError> {
    i32::try_from(age).map_err(|_| RepositoryError::Backend(format!("age {age} out of range")))
}

fn age_from_sql(age: i32) -> Result<u32, RepositoryError> {
    u32::try_from(age).map_err(|_| RepositoryError::Backend(format!("stored age {age} is negative")))
}

fn expect_one(changed: u64, id: CatId) -> Result<(), RepositoryError> {
    if changed == 0 {
        Err(RepositoryError::NotFound(id))
    } else {
        Ok(())
    }
}

fn map_pg_error(id: CatId, err: tokio_postgres::Error) -> RepositoryError {
    classify(id, err.code(), err.to_string())
}

fn classify(id: CatId, code: Option<&SqlState>, message: String) -> RepositoryError {
    if code == Some(&SqlState::UNIQUE_VIOLATION) {
        RepositoryError::AlreadyExists(id)
    } else {
        tracing::error!(%id, error = %message, "postgres query failed");
        RepositoryError::Backend(message)
    }
}

fn map_pool_error(err: PoolError) -> RepositoryError {
    match err {
        PoolError::Timeout(_) => RepositoryError::Backend("connection pool exhausted".into()),
        PoolError::Closed => RepositoryError::Backend("connection pool is closed".into()),
        other => RepositoryError::Backend(format!("could not acquire connection: {other}")),
    }
}
