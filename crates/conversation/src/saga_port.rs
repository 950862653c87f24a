//! How the runtime asks for a saga.

use async_trait::async_trait;
use common::{OperationContext, TransactionId};
use rest_client::{RequestError, RequestOptions, RestClient};
use saga::{CreateSagaRequest, Orchestrator, SagaAccepted, SagaError};
use saga_store::SagaStore;

use crate::error::{ConversationError, Result};

/// Creates sagas on behalf of a conversation. Requests always carry a
/// transaction id so a retried creation is recognisable.
#[async_trait]
pub trait SagaCreator: Send + Sync {
    async fn create(&self, ctx: &OperationContext, request: CreateSagaRequest) -> Result<TransactionId>;
}

/// In-process orchestrator.
#[async_trait]
impl<S: SagaStore + 'static> SagaCreator for Orchestrator<S> {
    async fn create(&self, ctx: &OperationContext, request: CreateSagaRequest) -> Result<TransactionId> {
        let saga = request.into_saga(ctx.tenant().clone())?;
        Ok(Orchestrator::create(self, ctx, saga).await?)
    }
}

/// Remote orchestrator reached with `POST /sagas`.
pub struct RestSagaCreator {
    client: RestClient,
    options: RequestOptions,
}

impl RestSagaCreator {
    pub fn new(client: RestClient) -> Self {
        Self {
            client,
            options: RequestOptions::new().retries(3),
        }
    }

    /// Client for `SAGA_ORCHESTRATOR_HOST`.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(RestClient::from_env("saga_orchestrator")?))
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl SagaCreator for RestSagaCreator {
    #[tracing::instrument(skip_all, fields(saga_type = %request.saga_type))]
    async fn create(&self, ctx: &OperationContext, mut request: CreateSagaRequest) -> Result<TransactionId> {
        let transaction_id = *request.transaction_id.get_or_insert_with(TransactionId::new);
        let ctx = ctx.clone().with_transaction(transaction_id);

        match self
            .client
            .post::<_, SagaAccepted>(&ctx, "/sagas", &request, &self.options)
            .await
        {
            Ok(accepted) => Ok(accepted.transaction_id),
            // An earlier attempt got through before timing out.
            Err(RequestError::Status { status: 409, .. }) => {
                tracing::debug!(%transaction_id, "saga already accepted");
                Ok(transaction_id)
            }
            Err(RequestError::BadRequest(reason)) => {
                Err(SagaError::Invalid(reason).into())
            }
            Err(e) => Err(ConversationError::Request(e)),
        }
    }
}
