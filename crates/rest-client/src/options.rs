use std::sync::Arc;
use std::time::Duration;

use common::OperationContext;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::Backoff;

/// Mutates outbound headers for one request.
pub type HeaderDecorator = Arc<dyn Fn(&OperationContext, &mut HeaderMap) + Send + Sync>;

/// Per-call configuration.
#[derive(Clone)]
pub struct RequestOptions {
    /// Total attempts, including the first.
    pub retries: u32,
    /// Deadline of each attempt; `None` uses the client default.
    pub timeout: Option<Duration>,
    pub decorators: Vec<HeaderDecorator>,
    pub backoff: Backoff,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self {
            retries: 1,
            timeout: None,
            decorators: vec![tenant_headers(), span_header()],
            backoff: Backoff::default(),
        }
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn decorator(mut self, decorator: HeaderDecorator) -> Self {
        self.decorators.push(decorator);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOptions")
            .field("retries", &self.retries)
            .field("timeout", &self.timeout)
            .field("decorators", &self.decorators.len())
            .field("backoff", &self.backoff)
            .finish()
    }
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

/// Adds the tenant header contract. Header names are lower-cased on the
/// wire; HTTP header matching is case-insensitive.
pub fn tenant_headers() -> HeaderDecorator {
    Arc::new(|ctx, headers| {
        let tenant = ctx.tenant();
        insert(headers, "tenant_id", &tenant.id().to_string());
        insert(headers, "region", tenant.region());
        insert(headers, "major_version", &tenant.major_version().to_string());
        insert(headers, "minor_version", &tenant.minor_version().to_string());
    })
}

pub fn span_header() -> HeaderDecorator {
    Arc::new(|ctx, headers| {
        insert(headers, "span_id", ctx.span_id().as_str());
        if let Some(tx) = ctx.transaction_id() {
            insert(headers, "transaction_id", &tx.to_string());
        }
    })
}

#[cfg(test)]
mod tests {
    use common::Tenant;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn default_decorators_emit_header_contract() {
        let ctx = OperationContext::new(Tenant::new(Uuid::new_v4(), "GMS", 83, 1));
        let mut headers = HeaderMap::new();
        for decorate in RequestOptions::new().decorators {
            decorate(&ctx, &mut headers);
        }

        assert_eq!(headers["TENANT_ID"], ctx.tenant().id().to_string().as_str());
        assert_eq!(headers["REGION"], "GMS");
        assert_eq!(headers["MAJOR_VERSION"], "83");
        assert_eq!(headers["SPAN_ID"], ctx.span_id().as_str());
        assert!(headers.get("TRANSACTION_ID").is_none());
    }

    #[test]
    fn retries_never_drop_below_one_attempt() {
        assert_eq!(RequestOptions::new().retries(0).retries, 1);
        assert_eq!(RequestOptions::default().retries, 1);
    }
}
