use tokio::sync::watch;

use crate::{SpanId, Tenant, TransactionId};

/// Per-operation ambient state: tenant, tracing span, saga correlation and
/// cancellation.
///
/// Saga correlation is the transaction id plus, on step commands and their
/// replies, the id of the step (`<step>` or `<step>:compensate`).
///
/// Consumers build one per record from message headers; HTTP handlers build
/// one per request. The tenant is structurally required by every core
/// operation, so [`OperationContext::tenant`] panics when it is missing.
#[derive(Debug, Clone)]
pub struct OperationContext {
    tenant: Option<Tenant>,
    span_id: SpanId,
    transaction_id: Option<TransactionId>,
    step_id: Option<String>,
    cancellation: Cancellation,
}

impl OperationContext {
    pub fn new(tenant: Tenant) -> Self {
        Self {
            tenant: Some(tenant),
            span_id: SpanId::new(),
            transaction_id: None,
            step_id: None,
            cancellation: Cancellation::never(),
        }
    }

    /// A context without tenant. Only useful at process edges before the
    /// tenant is known; core operations will panic on it.
    pub fn detached() -> Self {
        Self {
            tenant: None,
            span_id: SpanId::new(),
            transaction_id: None,
            step_id: None,
            cancellation: Cancellation::never(),
        }
    }

    pub fn with_span(mut self, span_id: SpanId) -> Self {
        self.span_id = span_id;
        self
    }

    pub fn with_transaction(mut self, transaction_id: TransactionId) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    pub fn with_step_id(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn without_step_id(mut self) -> Self {
        self.step_id = None;
        self
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// # Panics
    ///
    /// Panics when no tenant was installed. Callers must attach the tenant
    /// before invoking any core operation.
    pub fn tenant(&self) -> &Tenant {
        match &self.tenant {
            Some(tenant) => tenant,
            None => panic!("operation context has no tenant"),
        }
    }

    pub fn try_tenant(&self) -> Option<&Tenant> {
        self.tenant.as_ref()
    }

    pub fn span_id(&self) -> &SpanId {
        &self.span_id
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction_id
    }

    pub fn step_id(&self) -> Option<&str> {
        self.step_id.as_deref()
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Owner side of a cancellation signal.
#[derive(Debug)]
pub struct CancellationSource {
    sender: watch::Sender<bool>,
}

impl CancellationSource {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn token(&self) -> Cancellation {
        Cancellation {
            receiver: Some(self.sender.subscribe()),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Cancellation {
    receiver: Option<watch::Receiver<bool>>,
}

impl Cancellation {
    /// A token that never fires.
    pub fn never() -> Self {
        Self { receiver: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.receiver.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested. Never resolves for
    /// [`Cancellation::never`] or when the source is dropped uncancelled.
    pub async fn cancelled(&self) {
        let Some(receiver) = &self.receiver else {
            return std::future::pending().await;
        };
        let mut receiver = receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;

    fn tenant() -> Tenant {
        Tenant::new(Uuid::new_v4(), "GMS", 83, 1)
    }

    #[test]
    fn context_carries_tenant_and_transaction() {
        let tx = TransactionId::new();
        let ctx = OperationContext::new(tenant()).with_transaction(tx);
        assert_eq!(ctx.tenant().region(), "GMS");
        assert_eq!(ctx.transaction_id(), Some(tx));
    }

    #[test]
    fn step_id_is_set_and_cleared() {
        let ctx = OperationContext::new(tenant()).with_step_id("destroy-ore:compensate");
        assert_eq!(ctx.step_id(), Some("destroy-ore:compensate"));
        assert_eq!(ctx.without_step_id().step_id(), None);
    }

    #[test]
    #[should_panic(expected = "operation context has no tenant")]
    fn missing_tenant_panics() {
        let ctx = OperationContext::detached();
        let _ = ctx.tenant();
    }

    #[tokio::test]
    async fn cancellation_wakes_waiters() {
        let source = CancellationSource::new();
        let token = source.token();
        assert!(!token.is_cancelled());

        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.cancelled().await }
        });
        source.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn never_token_does_not_resolve() {
        let token = Cancellation::never();
        let result = tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;
        assert!(result.is_err());
    }
}
