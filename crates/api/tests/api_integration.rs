//! Integration tests for the orchestrator service.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::{Config, Service};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{CharacterId, NpcId, OperationContext, Tenant, TransactionId};
use conversation::ConversationGraph;
use conversation::consumers::{CONVERSATION_COMMAND, START, StartBody};
use conversation::sender::NPC_COMMAND;
use message_bus::{InMemoryBroker, Message, Producer, codec};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{Action, table};
use saga_store::InMemorySagaStore;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    router: axum::Router,
    broker: Arc<InMemoryBroker>,
    service: Service<InMemorySagaStore>,
}

impl TestApp {
    async fn start() -> Self {
        let broker = Arc::new(InMemoryBroker::new());
        let config = Config {
            sweep_interval: Duration::from_millis(50),
            ..Config::default()
        };
        let service = Service::start(&config, InMemorySagaStore::new(), broker.clone())
            .await
            .unwrap();
        let router = service.router(get_metrics_handle());
        Self { router, broker, service }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    async fn post_saga(&self, tenant: &Tenant, body: Value) -> (StatusCode, Value) {
        self.send(with_tenant(Request::builder().method("POST").uri("/sagas"), tenant)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap())
        .await
    }

    async fn get_saga(&self, tenant: &Tenant, id: &str) -> (StatusCode, Value) {
        self.send(with_tenant(Request::builder().uri(format!("/sagas/{id}")), tenant)
            .body(Body::empty())
            .unwrap())
        .await
    }

    /// Polls the saga until `status` or the deadline.
    async fn wait_for_status(&self, tenant: &Tenant, id: &str, status: &str) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let (_, saga) = self.get_saga(tenant, id).await;
            if saga["status"] == status {
                return saga;
            }
            assert!(tokio::time::Instant::now() < deadline, "saga never reached {status}: {saga}");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn tenant() -> Tenant {
    Tenant::new(Uuid::new_v4(), "GMS", 83, 1)
}

fn with_tenant(builder: axum::http::request::Builder, tenant: &Tenant) -> axum::http::request::Builder {
    builder
        .header("TENANT_ID", tenant.id().to_string())
        .header("REGION", tenant.region())
        .header("MAJOR_VERSION", tenant.major_version().to_string())
        .header("MINOR_VERSION", tenant.minor_version().to_string())
}

fn mesos_saga(transaction_id: Option<TransactionId>) -> Value {
    let mut body = json!({
        "sagaType": "quest_reward",
        "initiatedBy": "QUEST_2000",
        "steps": [{
            "stepId": "award_mesos",
            "action": "award_mesos",
            "payload": {"characterId": 1001, "amount": 500}
        }]
    });
    if let Some(transaction_id) = transaction_id {
        body["transactionId"] = json!(transaction_id);
    }
    body
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::start().await;

    let (status, json) = app
        .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    app.service.stop().await;
}

#[tokio::test]
async fn test_create_saga_is_accepted_and_dispatched() {
    let app = TestApp::start().await;
    let tenant = tenant();

    let (status, json) = app.post_saga(&tenant, mesos_saga(None)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = json["transactionId"].as_str().unwrap().to_string();

    let (status, saga) = app.get_saga(&tenant, &id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saga["transactionId"], id);
    assert_eq!(saga["sagaType"], "quest_reward");
    assert_eq!(saga["initiatedBy"], "QUEST_2000");
    assert_eq!(saga["status"], "active");
    assert_eq!(saga["steps"][0]["action"], "award_mesos");

    let spec = table::spec(Action::AwardMesos);
    let commands = app.broker.records_for_key(&spec.command_topic.name(), "1001").await;
    assert_eq!(commands.len(), 1);
    app.service.stop().await;
}

#[tokio::test]
async fn test_status_event_on_the_bus_completes_saga() {
    let app = TestApp::start().await;
    let tenant = tenant();
    let (_, json) = app.post_saga(&tenant, mesos_saga(None)).await;
    let id = json["transactionId"].as_str().unwrap().to_string();
    let transaction_id = TransactionId::parse(&id).unwrap();

    let spec = table::spec(Action::AwardMesos);
    let reply = Message::new(spec.success, json!({}))
        .transaction(transaction_id)
        .character(CharacterId(1001));
    let ctx = OperationContext::new(tenant.clone()).with_transaction(transaction_id);
    Producer::new(app.broker.clone())
        .publish(&ctx, &spec.status_topic.name(), "1001", &reply)
        .await
        .unwrap();

    let saga = app.wait_for_status(&tenant, &id, "completed").await;
    assert_eq!(saga["steps"][0]["status"], "completed");

    let outcomes = app.broker.records_for_key(&table::SAGA_STATUS.name(), &id).await;
    assert_eq!(outcomes.len(), 1);
    app.service.stop().await;
}

#[tokio::test]
async fn test_missing_tenant_headers_are_rejected() {
    let app = TestApp::start().await;

    let (status, json) = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/sagas")
                .header("content-type", "application/json")
                .body(Body::from(mesos_saga(None).to_string()))
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("TENANT_ID"));
    app.service.stop().await;
}

#[tokio::test]
async fn test_invalid_sagas_are_bad_requests() {
    let app = TestApp::start().await;
    let tenant = tenant();

    let (status, _) = app
        .post_saga(&tenant, json!({"sagaType": "quest_reward", "initiatedBy": "x", "steps": []}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut bad_payload = mesos_saga(None);
    bad_payload["steps"][0]["payload"] = json!({"templateId": "sword"});
    let (status, json) = app.post_saga(&tenant, bad_payload).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("award_mesos"));

    let (status, _) = app.post_saga(&tenant, json!({"sagaType": "teleport"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    app.service.stop().await;
}

#[tokio::test]
async fn test_duplicate_transaction_id_conflicts() {
    let app = TestApp::start().await;
    let tenant = tenant();
    let transaction_id = TransactionId::new();

    let (status, json) = app.post_saga(&tenant, mesos_saga(Some(transaction_id))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["transactionId"], transaction_id.to_string());

    let (status, _) = app.post_saga(&tenant, mesos_saga(Some(transaction_id))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    app.service.stop().await;
}

#[tokio::test]
async fn test_sagas_are_invisible_to_other_tenants() {
    let app = TestApp::start().await;
    let owner = tenant();
    let (_, json) = app.post_saga(&owner, mesos_saga(None)).await;
    let id = json["transactionId"].as_str().unwrap();

    let (status, _) = app.get_saga(&tenant(), id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.get_saga(&owner, &TransactionId::new().to_string()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.get_saga(&owner, "not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    app.service.stop().await;
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = TestApp::start().await;
    app.post_saga(&tenant(), mesos_saga(None)).await;

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("saga_created_total"), "{text}");
    app.service.stop().await;
}

#[tokio::test]
async fn test_start_command_opens_a_conversation() {
    let app = TestApp::start().await;
    let tenant = tenant();
    let graph: ConversationGraph = serde_json::from_value(json!({
        "npcId": 9010000,
        "startState": "hello",
        "states": [{
            "id": "hello",
            "dialogue": {
                "dialogueType": "sendNext",
                "text": "Welcome to Henesys.",
                "choices": [{"text": "Next", "nextState": "end"}]
            }
        }]
    }))
    .unwrap();
    app.service
        .conversations()
        .catalog()
        .install(tenant.id(), graph)
        .unwrap();

    let start = Message::new(
        START,
        StartBody {
            npc_id: NpcId(9010000),
            account_id: Default::default(),
            map_id: common::MapId(100000000),
        },
    )
    .character(CharacterId(1001));
    Producer::new(app.broker.clone())
        .publish(&OperationContext::new(tenant.clone()), &CONVERSATION_COMMAND.name(), "1001", &start)
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let talk = loop {
        let records = app.broker.records_for_key(&NPC_COMMAND.name(), "1001").await;
        if let Some(record) = records.first() {
            break codec::decode::<Message>(&record.payload).unwrap();
        }
        assert!(tokio::time::Instant::now() < deadline, "no dialogue was sent");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(talk.kind, "TALK");
    assert_eq!(talk.body["message"], "Welcome to Henesys.");
    assert_eq!(talk.body["messageType"], "NEXT");
    assert_eq!(
        app.service.conversations().registry().active(tenant.id()),
        vec![CharacterId(1001)]
    );
    app.service.stop().await;
}

#[tokio::test]
async fn test_conversation_dir_is_installed_for_the_process_tenant() {
    let _ = Tenant::install_process(tenant());
    let process = Tenant::process().unwrap().clone();

    let dir = std::env::temp_dir().join(format!("npc-conversations-{}", Uuid::new_v4()));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let graph = json!({
        "npcId": 1012000,
        "startState": "hello",
        "states": [{
            "id": "hello",
            "dialogue": {"dialogueType": "sendOk", "text": "Hi there."}
        }]
    });
    tokio::fs::write(dir.join("1012000.json"), graph.to_string()).await.unwrap();
    tokio::fs::write(dir.join("notes.txt"), "not a graph").await.unwrap();

    let config = Config {
        conversation_dir: Some(dir.clone()),
        ..Config::default()
    };
    let service = Service::start(&config, InMemorySagaStore::new(), Arc::new(InMemoryBroker::new()))
        .await
        .unwrap();

    let catalog = service.conversations().catalog();
    assert!(catalog.get(process.id(), NpcId(1012000)).is_ok());
    assert!(catalog.get(tenant().id(), NpcId(1012000)).is_err());

    service.stop().await;
    tokio::fs::remove_dir_all(&dir).await.unwrap();
}
