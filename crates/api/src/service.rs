//! Wires the orchestrator, the conversation runtime and their consumers.

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use common::{CancellationSource, Tenant};
use conversation::{
    BusDialogueSender, ConversationCatalog, ConversationGraph, ConversationRegistry, ConversationRuntime,
    RestSagaCreator, SagaCreator,
};
use message_bus::{Broker, ConsumerManager, Producer};
use metrics_exporter_prometheus::PrometheusHandle;
use rest_client::RestClient;
use saga::{Orchestrator, OrchestratorConfig};
use saga_store::SagaStore;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::StartupError;
use crate::routes::sagas::AppState;

/// The running service minus its HTTP listener.
pub struct Service<S> {
    orchestrator: Arc<Orchestrator<S>>,
    conversations: Arc<ConversationRuntime>,
    consumers: ConsumerManager,
    shutdown: CancellationSource,
    sweeper: JoinHandle<()>,
}

impl<S: SagaStore + 'static> Service<S> {
    /// Recovers unfinished sagas, then starts consuming and sweeping.
    #[tracing::instrument(skip_all)]
    pub async fn start(config: &Config, store: S, broker: Arc<dyn Broker>) -> Result<Self, StartupError> {
        let producer = Producer::new(broker.clone());
        let orchestrator = Arc::new(
            Orchestrator::new(store, producer.clone()).with_config(OrchestratorConfig {
                step_timeout: config.step_timeout,
                sweep_interval: config.sweep_interval,
                ..Default::default()
            }),
        );

        let catalog = Arc::new(ConversationCatalog::new());
        if let Some(dir) = &config.conversation_dir {
            let tenant = Tenant::process().ok_or_else(|| {
                StartupError::Conversations("CONVERSATION_DIR needs the process tenant".into())
            })?;
            let installed = install_conversations(&catalog, tenant, dir).await?;
            tracing::info!(npcs = installed, dir = %dir.display(), "conversations installed");
        }

        let sagas: Arc<dyn SagaCreator> = match &config.saga_orchestrator_host {
            Some(host) => {
                tracing::info!(%host, "conversations create sagas remotely");
                Arc::new(RestSagaCreator::new(
                    RestClient::new(host.as_str()).with_default_timeout(config.http_client_timeout),
                ))
            }
            None => orchestrator.clone(),
        };
        let conversations = Arc::new(ConversationRuntime::new(
            catalog,
            Arc::new(ConversationRegistry::new()),
            Arc::new(BusDialogueSender::new(producer)),
            sagas,
        ));
        orchestrator.register_hook(conversations.hook());

        orchestrator.recover().await?;

        let consumers = ConsumerManager::new(broker);
        saga::consumers::register(&consumers, orchestrator.clone()).await?;
        conversation::consumers::register(&consumers, conversations.clone()).await?;

        let shutdown = CancellationSource::new();
        let sweeper = orchestrator.spawn_sweeper(shutdown.token());

        Ok(Self {
            orchestrator,
            conversations,
            consumers,
            shutdown,
            sweeper,
        })
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator<S>> {
        &self.orchestrator
    }

    pub fn conversations(&self) -> &Arc<ConversationRuntime> {
        &self.conversations
    }

    pub fn router(&self, metrics: PrometheusHandle) -> Router {
        crate::create_app(
            Arc::new(AppState {
                orchestrator: self.orchestrator.clone(),
            }),
            metrics,
        )
    }

    /// Stops the sweeper and drains the consumers.
    pub async fn stop(self) {
        self.shutdown.cancel();
        self.consumers.shutdown().await;
        if let Err(e) = self.sweeper.await {
            tracing::error!(error = %e, "sweeper task aborted");
        }
    }
}

/// Installs every `*.json` graph under `dir` for `tenant`.
pub async fn install_conversations(
    catalog: &ConversationCatalog,
    tenant: &Tenant,
    dir: &Path,
) -> Result<usize, StartupError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut installed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        let raw = tokio::fs::read(&path).await?;
        let graph: ConversationGraph = serde_json::from_slice(&raw)
            .map_err(|e| StartupError::Conversations(format!("{}: {e}", path.display())))?;
        let npc_id = graph.npc_id;
        catalog
            .install(tenant.id(), graph)
            .map_err(|e| StartupError::Conversations(format!("{}: {e}", path.display())))?;
        tracing::debug!(%npc_id, path = %path.display(), "conversation installed");
        installed += 1;
    }
    Ok(installed)
}
