//! Request context from the header contract.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::{OperationContext, SpanId, Tenant};
use message_bus::headers::{MAJOR_VERSION, MINOR_VERSION, REGION, SPAN_ID, TENANT_ID};

use crate::error::ApiError;

/// Operation context of an HTTP request. The tenant comes from the
/// `TENANT_ID`, `REGION`, `MAJOR_VERSION` and `MINOR_VERSION` headers; a
/// `SPAN_ID` header continues the caller's span.
#[derive(Debug, Clone)]
pub struct RequestContext(pub OperationContext);

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &'static str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| ApiError::Tenant(format!("{name} header is missing")))
        };
        let tenant = Tenant::parse(
            header(TENANT_ID)?,
            header(REGION)?,
            header(MAJOR_VERSION)?,
            header(MINOR_VERSION)?,
        )?;

        let mut ctx = OperationContext::new(tenant);
        if let Some(span) = parts.headers.get(SPAN_ID).and_then(|v| v.to_str().ok()) {
            ctx = ctx.with_span(SpanId::from_string(span));
        }
        Ok(Self(ctx))
    }
}
