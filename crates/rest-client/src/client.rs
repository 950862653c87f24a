use std::time::Duration;

use common::OperationContext;
use reqwest::{Method, StatusCode, header::HeaderMap};
use serde::{Serialize, de::DeserializeOwned};

use crate::{RequestError, RequestOptions, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves `<SERVICE>_HOST`, e.g. `host_from_env("saga_orchestrator")`
/// reads `SAGA_ORCHESTRATOR_HOST`.
pub fn host_from_env(service: &str) -> Result<String> {
    let key = format!("{}_HOST", service.to_ascii_uppercase().replace('-', "_"));
    match std::env::var(&key) {
        Ok(host) if !host.trim().is_empty() => Ok(host.trim_end_matches('/').to_string()),
        _ => Err(RequestError::MissingHost(key)),
    }
}

/// HTTP client bound to one leaf service.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    default_timeout: Duration,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Client for `<SERVICE>_HOST`.
    pub fn from_env(service: &str) -> Result<Self> {
        Ok(Self::new(host_from_env(service)?))
    }

    /// Process-wide attempt timeout used when options carry none.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        ctx: &OperationContext,
        path: &str,
        options: &RequestOptions,
    ) -> Result<T> {
        self.send::<(), T>(ctx, Method::GET, path, None, options).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        ctx: &OperationContext,
        path: &str,
        body: &B,
        options: &RequestOptions,
    ) -> Result<T> {
        self.send(ctx, Method::POST, path, Some(body), options).await
    }

    #[tracing::instrument(
        skip(self, ctx, body, options),
        fields(tenant_id = %ctx.tenant().id())
    )]
    async fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        ctx: &OperationContext,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: &RequestOptions,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let mut headers = HeaderMap::new();
        for decorate in &options.decorators {
            decorate(ctx, &mut headers);
        }

        let attempts = options.retries.max(1);
        let mut attempt = 1;
        loop {
            metrics::counter!("rest_client_attempts_total").increment(1);
            let mut request = self
                .http
                .request(method.clone(), &url)
                .headers(headers.clone());
            if let Some(body) = body {
                request = request.json(body);
            }

            let result = tokio::select! {
                _ = ctx.cancellation().cancelled() => return Err(RequestError::Cancelled),
                result = tokio::time::timeout(timeout, Self::attempt::<T>(request)) => {
                    result.unwrap_or(Err(RequestError::Timeout(timeout)))
                }
            };

            match result {
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = options.backoff.delay(attempt);
                    tracing::warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "request failed, retrying");
                    tokio::select! {
                        _ = ctx.cancellation().cancelled() => return Err(RequestError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn attempt<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        match status {
            StatusCode::OK | StatusCode::ACCEPTED => {
                let payload: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
                Ok(serde_json::from_slice(payload)?)
            }
            StatusCode::BAD_REQUEST => Err(RequestError::BadRequest(
                String::from_utf8_lossy(&bytes).into_owned(),
            )),
            StatusCode::NOT_FOUND => Err(RequestError::NotFound),
            other => Err(RequestError::Status {
                status: other.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_lookup_names_the_missing_variable() {
        let err = host_from_env("rest-client-test-missing").unwrap_err();
        assert!(matches!(err, RequestError::MissingHost(key) if key == "REST_CLIENT_TEST_MISSING_HOST"));
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        let client = RestClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
