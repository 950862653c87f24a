//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p saga-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{Tenant, TransactionId};
use futures_util::StreamExt;
use saga_store::{
    PostgresSagaStore, RecordStatus, SagaQuery, SagaRecord, SagaStore, SagaStoreExt, StoreError,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/001_create_sagas_table.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresSagaStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE sagas")
        .execute(&pool)
        .await
        .unwrap();

    PostgresSagaStore::new(pool)
}

fn tenant() -> Tenant {
    Tenant::new(Uuid::new_v4(), "GMS", 83, 1)
}

fn record(tenant: &Tenant, tx: TransactionId) -> SagaRecord {
    SagaRecord::new(
        tenant.clone(),
        tx,
        "craft_transaction",
        "npc:9010000",
        serde_json::json!([{"stepId": "destroy_material_4000000", "status": "pending"}]),
    )
}

#[tokio::test]
#[serial]
async fn insert_and_load_round_trip() {
    let store = get_test_store().await;
    let tenant = tenant();
    let tx = TransactionId::new();
    store.insert(record(&tenant, tx)).await.unwrap();

    let loaded = store.require(tenant.id(), tx).await.unwrap();
    assert_eq!(loaded.tenant, tenant);
    assert_eq!(loaded.saga_type, "craft_transaction");
    assert_eq!(loaded.status, RecordStatus::Active);
    assert_eq!(loaded.steps[0]["stepId"], "destroy_material_4000000");
    assert_eq!(loaded.version, 1);
}

#[tokio::test]
#[serial]
async fn duplicate_insert_is_rejected_per_tenant() {
    let store = get_test_store().await;
    let (a, b) = (tenant(), tenant());
    let tx = TransactionId::new();

    store.insert(record(&a, tx)).await.unwrap();
    store.insert(record(&b, tx)).await.unwrap();
    let err = store.insert(record(&a, tx)).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateTransaction { .. }));
}

#[tokio::test]
#[serial]
async fn update_bumps_version_and_detects_conflicts() {
    let store = get_test_store().await;
    let tenant = tenant();
    let tx = TransactionId::new();
    store.insert(record(&tenant, tx)).await.unwrap();

    let loaded = store.require(tenant.id(), tx).await.unwrap();
    let stale = loaded.clone();
    let mut next = loaded;
    next.status = RecordStatus::Compensating;
    let stored = store.update(next).await.unwrap();
    assert_eq!(stored.version, 2);

    let err = store.update(stale).await.unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict { actual: 2, .. }));

    let reloaded = store.require(tenant.id(), tx).await.unwrap();
    assert_eq!(reloaded.status, RecordStatus::Compensating);
}

#[tokio::test]
#[serial]
async fn timed_out_query_uses_deadline() {
    let store = get_test_store().await;
    let tenant = tenant();
    let now = Utc::now();

    let expired = TransactionId::new();
    let mut r = record(&tenant, expired);
    r.timeout_at = Some(now - Duration::seconds(5));
    store.insert(r).await.unwrap();

    let pending = TransactionId::new();
    let mut r = record(&tenant, pending);
    r.timeout_at = Some(now + Duration::seconds(30));
    store.insert(r).await.unwrap();

    let found = store.query(SagaQuery::timed_out(now)).await.unwrap();
    let ids: Vec<_> = found.iter().map(|r| r.transaction_id).collect();
    assert_eq!(ids, vec![expired]);
}

#[tokio::test]
#[serial]
async fn stream_unfinished_returns_open_sagas() {
    let store = get_test_store().await;
    let tenant = tenant();
    let open = TransactionId::new();
    store.insert(record(&tenant, open)).await.unwrap();

    let mut done = record(&tenant, TransactionId::new());
    done.status = RecordStatus::Completed;
    store.insert(done).await.unwrap();

    let ids: Vec<_> = store
        .stream_unfinished()
        .await
        .unwrap()
        .map(|r| r.unwrap().transaction_id)
        .collect()
        .await;
    assert_eq!(ids, vec![open]);
}
