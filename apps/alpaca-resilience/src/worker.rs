//! A worker pairs the shared retry engine with one exclusive transport.
//!
//! ```rust,ignore
//! let engine = Arc::new(RetryEngine::new("alpaca", retry, rate_limit)?);
//! let pool = TransportPool::new("alpaca", HttpTransportFactory::new(http));
//!
//! for id in 0..4 {
//!     let mut worker = ResilientWorker::new(Arc::clone(&engine), pool.acquire(format!("worker-{id}"))?);
//!     tokio::spawn(async move {
//!         let account: Account = worker.send_json(&TransportRequest::get("/v2/account")).await?;
//!         // ...
//!     });
//! }
//! ```

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::resilience::{RetryEngine, RetryError};
use crate::transport::{Transport, TransportLease, TransportRequest, TransportResponse};

/// Runs requests through the retry engine on a transport it owns.
#[derive(Debug)]
pub struct ResilientWorker<T> {
    engine: Arc<RetryEngine>,
    lease: TransportLease<T>,
}

impl<T: Transport> ResilientWorker<T> {
    /// Create a worker.
    #[must_use]
    pub const fn new(engine: Arc<RetryEngine>, lease: TransportLease<T>) -> Self {
        Self { engine, lease }
    }

    /// Worker identity, taken from its lease.
    #[must_use]
    pub fn identity(&self) -> &str {
        self.lease.identity()
    }

    /// The shared engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<RetryEngine> {
        &self.engine
    }

    /// Send a request under the retry policy.
    pub async fn send(
        &mut self,
        request: &TransportRequest,
    ) -> Result<TransportResponse, RetryError<TransportError>> {
        self.drive(request, None).await
    }

    /// Send a request, giving up when `cancel` fires.
    pub async fn send_with_cancel(
        &mut self,
        request: &TransportRequest,
        cancel: &CancellationToken,
    ) -> Result<TransportResponse, RetryError<TransportError>> {
        self.drive(request, Some(cancel)).await
    }

    /// Send a request and decode the JSON body.
    ///
    /// A decode failure is returned as an operation error; it is not retried.
    pub async fn send_json<R: DeserializeOwned>(
        &mut self,
        request: &TransportRequest,
    ) -> Result<R, RetryError<TransportError>> {
        self.send(request).await?.json().map_err(RetryError::Operation)
    }

    /// Give back the lease, e.g. to release it to its pool.
    pub fn into_lease(self) -> TransportLease<T> {
        self.lease
    }

    async fn drive(
        &mut self,
        request: &TransportRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<TransportResponse, RetryError<TransportError>> {
        let mut session = self.engine.session(cancel);
        session.check_circuit()?;

        loop {
            session.admit().await?;
            match self.lease.execute(request).await {
                Ok(response) => {
                    session.record_success();
                    return Ok(response);
                }
                Err(error) => session.record_failure(error).await?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkErrorKind;
    use crate::resilience::{FixedJitter, RateLimitConfig, RetryConfig};
    use crate::transport::{TransportFactory, TransportPool};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replays scripted outcomes, then succeeds.
    #[derive(Debug, Default)]
    struct ScriptedTransport {
        script: VecDeque<TransportError>,
        calls: u32,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(
            &mut self,
            _request: &TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            self.calls += 1;
            match self.script.pop_front() {
                Some(err) => Err(err),
                None => Ok(TransportResponse {
                    status: 200,
                    body: r#"{"status":"ACTIVE"}"#.to_string(),
                }),
            }
        }
    }

    struct ScriptedFactory(Vec<TransportError>);

    impl TransportFactory for ScriptedFactory {
        type Transport = ScriptedTransport;

        fn create(&self, _identity: &str) -> Result<ScriptedTransport, TransportError> {
            Ok(ScriptedTransport {
                script: self.0.iter().cloned().collect(),
                calls: 0,
            })
        }
    }

    fn engine() -> Arc<RetryEngine> {
        let config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryConfig::default()
        };
        Arc::new(
            RetryEngine::new("worker-test", config, RateLimitConfig::default())
                .unwrap()
                .with_jitter(FixedJitter(0.5)),
        )
    }

    #[tokio::test]
    async fn test_send_retries_on_owned_transport() {
        let pool = TransportPool::new(
            "test",
            ScriptedFactory(vec![TransportError::network(NetworkErrorKind::Reset, "reset")]),
        );
        let mut worker = ResilientWorker::new(engine(), pool.acquire("worker-1").unwrap());

        let response = worker.send(&TransportRequest::get("/v2/account")).await.unwrap();
        assert_eq!(response.status, 200);

        let lease = worker.into_lease();
        assert_eq!(lease.calls, 2);
        pool.release(lease);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_send_json_decodes() {
        let pool = TransportPool::new("test", ScriptedFactory(Vec::new()));
        let mut worker = ResilientWorker::new(engine(), pool.acquire("worker-1").unwrap());

        let body: serde_json::Value = worker
            .send_json(&TransportRequest::get("/v2/account"))
            .await
            .unwrap();
        assert_eq!(body["status"], "ACTIVE");
        assert_eq!(worker.identity(), "worker-1");
    }

    #[tokio::test]
    async fn test_send_surfaces_client_error() {
        let pool = TransportPool::new(
            "test",
            ScriptedFactory(vec![TransportError::Client {
                status: 403,
                code: None,
                message: "forbidden".to_string(),
            }]),
        );
        let mut worker = ResilientWorker::new(engine(), pool.acquire("worker-1").unwrap());

        let err = worker
            .send(&TransportRequest::get("/v2/account"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RetryError::Operation(TransportError::Client { status: 403, .. })
        ));
        assert_eq!(worker.into_lease().calls, 1);
    }

    #[tokio::test]
    async fn test_send_with_cancelled_token() {
        let pool = TransportPool::new("test", ScriptedFactory(Vec::new()));
        let mut worker = ResilientWorker::new(engine(), pool.acquire("worker-1").unwrap());
        let token = CancellationToken::new();
        token.cancel();

        let err = worker
            .send_with_cancel(&TransportRequest::get("/v2/account"), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, RetryError::Cancelled { attempts: 0 }));
        assert_eq!(worker.into_lease().calls, 0);
    }
}
