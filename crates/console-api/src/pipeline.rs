//! Request pipeline with single-flight session renewal
//!
//! A call that comes back 401 on its first attempt, while a renewal token is
//! held, waits for a session renewal and is replayed once. The renewal is a
//! shared future owned by the pipeline: the first failing call installs it,
//! every call failing concurrently awaits the same handle, and the handle
//! removes itself from the pipeline when it settles. Only one request reaches
//! the renewal endpoint per episode, so concurrent failures cannot race each
//! other into invalidating the renewal token.
//!
//! Renewal success replaces the credential pair. Renewal failure clears the
//! credential store and invokes the navigator once; waiting calls are still
//! replayed, now without a credential, and return whatever that yields.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use common::Secret;
use console_auth::{CredentialStore, RENEW_PATH, RenewRequest, TokenPair};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use reqwest::Url;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::envelope::unwrap_envelope;
use crate::error::{Error, Result};
use crate::navigator::Navigator;
use crate::request::{ApiRequest, Attempt};

/// Status the backend uses for an expired or invalid access token
const UNAUTHORIZED: u16 = 401;

/// Request pipeline settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// API root, e.g. `http://localhost:8080/api`
    pub base_url: String,
    /// Absolute per-dispatch timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Renewal endpoint relative to `base_url`
    #[serde(default = "default_renew_path")]
    pub renew_path: String,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_renew_path() -> String {
    RENEW_PATH.to_string()
}

impl PipelineConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs: default_timeout_secs(),
            renew_path: default_renew_path(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How a renewal episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalOutcome {
    Renewed,
    Failed,
}

type RenewalHandle = Shared<BoxFuture<'static, RenewalOutcome>>;

/// Result of one HTTP exchange, before the retry decision.
struct Dispatched {
    status: u16,
    outcome: Result<Value>,
    /// Access token injected into this dispatch, if any
    sent_token: Option<Secret<String>>,
}

/// Entry point for every backend call. Cheap to clone; clones share the
/// credential store and the in-flight renewal.
#[derive(Clone)]
pub struct RequestPipeline {
    inner: Arc<Inner>,
}

struct Inner {
    client: reqwest::Client,
    base_url: Url,
    config: PipelineConfig,
    credentials: Arc<CredentialStore>,
    navigator: Arc<dyn Navigator>,
    renewal: Mutex<Option<RenewalHandle>>,
}

impl RequestPipeline {
    pub fn new(
        config: PipelineConfig,
        credentials: Arc<CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        Self::with_client(reqwest::Client::new(), config, credentials, navigator)
    }

    /// Build on a caller-configured HTTP client (proxies, TLS roots).
    pub fn with_client(
        client: reqwest::Client,
        config: PipelineConfig,
        credentials: Arc<CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            Error::InvalidRequest(format!("invalid base_url {}: {e}", config.base_url))
        })?;
        if config.timeout_secs == 0 {
            return Err(Error::InvalidRequest(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        info!(base_url = %base_url, timeout_secs = config.timeout_secs, "request pipeline ready");
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                base_url,
                config,
                credentials,
                navigator,
                renewal: Mutex::new(None),
            }),
        })
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.inner.credentials
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Run a call and decode its `data` into `T`.
    pub async fn execute<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T> {
        let data = self.execute_value(request).await?;
        serde_json::from_value(data)
            .map_err(|e| Error::Decode(format!("unexpected data from {}: {e}", request.path())))
    }

    /// Run a call and return its raw `data`.
    #[instrument(skip_all, fields(request_id = %uuid::Uuid::new_v4(), method = %request.method(), path = %request.path()))]
    pub async fn execute_value(&self, request: &ApiRequest) -> Result<Value> {
        let mut attempt = Attempt::FIRST;
        loop {
            let dispatched = match self.dispatch(request, attempt).await {
                Ok(dispatched) => dispatched,
                Err(e) => {
                    warn!(attempt = attempt.number(), error = %e, "request failed before a response");
                    crate::metrics::record_request(Err(&e));
                    return Err(e);
                }
            };

            if dispatched.status == UNAUTHORIZED && self.renewal_eligible(request, attempt) {
                attempt = attempt.next();
                if self.credential_superseded(dispatched.sent_token.as_ref()) {
                    debug!("credential replaced while the call was in flight, replaying");
                } else {
                    let outcome = self.await_renewal().await;
                    debug!(?outcome, "renewal settled, replaying");
                }
                continue;
            }

            if let Err(e) = &dispatched.outcome {
                debug!(status = dispatched.status, attempt = attempt.number(), error = %e, "request failed");
            }
            crate::metrics::record_request(dispatched.outcome.as_ref().map(|_| ()));
            return dispatched.outcome;
        }
    }

    fn renewal_eligible(&self, request: &ApiRequest, attempt: Attempt) -> bool {
        attempt.may_renew()
            && !request.is_renewal()
            && self.inner.credentials.renewal_token().is_some()
    }

    /// Whether a renewal completed after this call was dispatched, in which
    /// case replaying with the current token is enough.
    fn credential_superseded(&self, sent: Option<&Secret<String>>) -> bool {
        match (sent, self.inner.credentials.access_token()) {
            (Some(sent), Some(current)) => *sent != current,
            _ => false,
        }
    }

    async fn dispatch(&self, request: &ApiRequest, attempt: Attempt) -> Result<Dispatched> {
        let url = self.url_for(request)?;

        let mut headers = request.headers().clone();
        let mut sent_token = None;
        if let Some(token) = self.inner.credentials.access_token() {
            // The replay always carries the post-renewal credential
            if attempt.is_retry() || !request.has_authorization() {
                headers.insert(AUTHORIZATION, bearer(&token)?);
                sent_token = Some(token);
            }
        }

        let timeout = self.inner.config.timeout();
        let mut builder = self
            .inner
            .client
            .request(request.method().clone(), url)
            .headers(headers)
            .timeout(timeout);
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, timeout))?;
        debug!(attempt = attempt.number(), status, "response received");

        Ok(Dispatched {
            status,
            outcome: unwrap_envelope(status, &body),
            sent_token,
        })
    }

    fn url_for(&self, request: &ApiRequest) -> Result<Url> {
        let path = request.path();
        let separator = if path.starts_with('/') { "" } else { "/" };
        let joined = format!(
            "{}{separator}{path}",
            self.inner.base_url.as_str().trim_end_matches('/')
        );
        let mut url = Url::parse(&joined)
            .map_err(|e| Error::InvalidRequest(format!("invalid path {path}: {e}")))?;
        if !request.query_pairs().is_empty() {
            url.query_pairs_mut().extend_pairs(request.query_pairs());
        }
        Ok(url)
    }

    /// Join the in-flight renewal, starting one if none is running.
    async fn await_renewal(&self) -> RenewalOutcome {
        let handle = {
            let mut slot = self
                .inner
                .renewal
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!("joining in-flight renewal");
                    in_flight.clone()
                }
                None => {
                    let handle = self.clone().renew().shared();
                    *slot = Some(handle.clone());
                    handle
                }
            }
        };
        handle.await
    }

    fn renew(self) -> BoxFuture<'static, RenewalOutcome> {
        async move {
            let outcome = self.run_renewal().await;
            self.inner
                .renewal
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            outcome
        }
        .boxed()
    }

    async fn run_renewal(&self) -> RenewalOutcome {
        let Some(renewal) = self.inner.credentials.renewal_token() else {
            debug!("credential cleared before renewal started");
            return RenewalOutcome::Failed;
        };

        info!("access token rejected, renewing session");
        match self.request_new_tokens(&renewal).await {
            Ok(pair) => {
                self.inner
                    .credentials
                    .set_credential(pair.token, pair.refresh_token);
                info!("session renewed");
                crate::metrics::record_renewal("renewed");
                RenewalOutcome::Renewed
            }
            Err(e) => {
                warn!(error = %e, "session renewal failed, signing out");
                self.inner.credentials.clear();
                self.inner.navigator.to_login();
                crate::metrics::record_renewal("failed");
                RenewalOutcome::Failed
            }
        }
    }

    async fn request_new_tokens(&self, renewal: &Secret<String>) -> Result<TokenPair> {
        let request = ApiRequest::post(self.inner.config.renew_path.as_str())
            .json(&RenewRequest {
                refresh_token: renewal.expose().as_str(),
            })?
            .for_renewal();
        let pair: TokenPair = self.execute(&request).await?;
        if pair.token.is_empty() || pair.refresh_token.is_empty() {
            return Err(Error::Decode("renewal response carried an empty token".into()));
        }
        Ok(pair)
    }
}

fn bearer(token: &Secret<String>) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
        .map_err(|_| Error::InvalidRequest("access token is not a valid header value".into()))?;
    value.set_sensitive(true);
    Ok(value)
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> Error {
    if e.is_timeout() {
        Error::Timeout(timeout)
    } else {
        Error::Transport(e.to_string())
    }
}
