use async_trait::async_trait;
use common::{Tenant, TransactionId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    RecordStatus, Result, SagaQuery, SagaRecord, StoreError,
    store::{SagaStore, SagaStream},
};

const COLUMNS: &str = "tenant_id, transaction_id, tenant_region, tenant_major_version, \
     tenant_minor_version, saga_type, initiated_by, status, steps, version, timeout_at, \
     created_at, updated_at";

/// PostgreSQL-backed saga store.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects and verifies the database answers.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<SagaRecord> {
        let major: i32 = row.try_get("tenant_major_version")?;
        let minor: i32 = row.try_get("tenant_minor_version")?;
        let tenant = Tenant::new(
            row.try_get::<Uuid, _>("tenant_id")?,
            row.try_get::<String, _>("tenant_region")?,
            major as u16,
            minor as u16,
        );
        let status: String = row.try_get("status")?;

        Ok(SagaRecord {
            tenant,
            transaction_id: TransactionId::from_uuid(row.try_get::<Uuid, _>("transaction_id")?),
            saga_type: row.try_get("saga_type")?,
            initiated_by: row.try_get("initiated_by")?,
            status: status.parse()?,
            steps: row.try_get("steps")?,
            version: row.try_get("version")?,
            timeout_at: row.try_get("timeout_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    #[tracing::instrument(skip(self, record), fields(transaction_id = %record.transaction_id))]
    async fn insert(&self, record: SagaRecord) -> Result<()> {
        let inserted = sqlx::query(&format!(
            "INSERT INTO sagas ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (tenant_id, transaction_id) DO NOTHING"
        ))
        .bind(record.tenant_id())
        .bind(record.transaction_id.as_uuid())
        .bind(record.tenant.region())
        .bind(i32::from(record.tenant.major_version()))
        .bind(i32::from(record.tenant.minor_version()))
        .bind(&record.saga_type)
        .bind(&record.initiated_by)
        .bind(record.status.as_str())
        .bind(&record.steps)
        .bind(record.version)
        .bind(record.timeout_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::DuplicateTransaction {
                tenant_id: record.tenant_id(),
                transaction_id: record.transaction_id,
            });
        }
        Ok(())
    }

    async fn get(&self, tenant_id: Uuid, transaction_id: TransactionId) -> Result<Option<SagaRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM sagas WHERE tenant_id = $1 AND transaction_id = $2"
        ))
        .bind(tenant_id)
        .bind(transaction_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    #[tracing::instrument(skip(self, record), fields(transaction_id = %record.transaction_id, version = record.version))]
    async fn update(&self, mut record: SagaRecord) -> Result<SagaRecord> {
        let now = chrono::Utc::now();
        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE sagas
            SET status = $3, steps = $4, timeout_at = $5, updated_at = $6, version = version + 1
            WHERE tenant_id = $1 AND transaction_id = $2 AND version = $7
            RETURNING version
            "#,
        )
        .bind(record.tenant_id())
        .bind(record.transaction_id.as_uuid())
        .bind(record.status.as_str())
        .bind(&record.steps)
        .bind(record.timeout_at)
        .bind(now)
        .bind(record.version)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(version) => {
                record.version = version;
                record.updated_at = now;
                Ok(record)
            }
            None => {
                let actual: Option<i64> = sqlx::query_scalar(
                    "SELECT version FROM sagas WHERE tenant_id = $1 AND transaction_id = $2",
                )
                .bind(record.tenant_id())
                .bind(record.transaction_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

                Err(match actual {
                    Some(actual) => StoreError::VersionConflict {
                        transaction_id: record.transaction_id,
                        expected: record.version,
                        actual,
                    },
                    None => StoreError::NotFound {
                        tenant_id: record.tenant_id(),
                        transaction_id: record.transaction_id,
                    },
                })
            }
        }
    }

    async fn query(&self, query: SagaQuery) -> Result<Vec<SagaRecord>> {
        let mut sql = format!("SELECT {COLUMNS} FROM sagas WHERE 1=1");
        let mut param_count = 0;

        if query.tenant_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND tenant_id = ${param_count}"));
        }
        if query.statuses.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ANY(${param_count})"));
        }
        if query.saga_type.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND saga_type = ${param_count}"));
        }
        if query.timed_out_at.is_some() {
            param_count += 1;
            sql.push_str(&format!(
                " AND timeout_at IS NOT NULL AND timeout_at <= ${param_count} ORDER BY timeout_at ASC"
            ));
        } else {
            sql.push_str(" ORDER BY created_at ASC");
        }
        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);
        if let Some(tenant_id) = query.tenant_id {
            sqlx_query = sqlx_query.bind(tenant_id);
        }
        if let Some(statuses) = query.statuses {
            let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
            sqlx_query = sqlx_query.bind(statuses);
        }
        if let Some(saga_type) = query.saga_type {
            sqlx_query = sqlx_query.bind(saga_type);
        }
        if let Some(now) = query.timed_out_at {
            sqlx_query = sqlx_query.bind(now);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn stream_unfinished(&self) -> Result<SagaStream> {
        use futures_util::stream;

        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM sagas WHERE status IN ($1, $2) ORDER BY created_at ASC"
        ))
        .bind(RecordStatus::Active.as_str())
        .bind(RecordStatus::Compensating.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(Box::pin(stream::iter(
            rows.into_iter().map(Self::row_to_record),
        )))
    }
}
