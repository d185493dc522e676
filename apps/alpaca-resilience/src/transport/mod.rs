//! Transports and per-worker transport ownership.
//!
//! A transport's in-flight request state is not safe to share, so every
//! worker owns exactly one. [`TransportPool`] hands out [`TransportLease`]s:
//!
//! - a lease is not `Clone` and not `Sync`, so it cannot be shared between
//!   concurrent contexts, only moved into one;
//! - requests need `&mut`, so even a single task cannot overlap two calls;
//! - acquiring an identity that is already leased is a programming error and
//!   returns [`PoolError::AlreadyLeased`].
//!
//! ```compile_fail
//! use alpaca_resilience::transport::TransportLease;
//!
//! fn needs_sync<T: Sync>() {}
//! needs_sync::<TransportLease<()>>();
//! ```
//!
//! ```compile_fail
//! use alpaca_resilience::transport::TransportLease;
//!
//! fn needs_clone<T: Clone>() {}
//! needs_clone::<TransportLease<()>>();
//! ```

pub mod http;

use std::cell::Cell;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::error::TransportError;
use crate::observability;

pub use http::{AlpacaEnvironment, HttpTransport, HttpTransportConfig, HttpTransportFactory};

/// A single broker API request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the transport's base URL, starting with `/`.
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<serde_json::Value>,
}

impl TransportRequest {
    /// Create a request with no query or body.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// GET request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// POST request with a JSON body.
    #[must_use]
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            body: Some(body),
            ..Self::new(Method::POST, path)
        }
    }

    /// DELETE request.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// A successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: String,
}

impl TransportResponse {
    /// Decode the body as JSON; an empty body decodes as `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        let text = if self.body.trim().is_empty() {
            "null"
        } else {
            self.body.as_str()
        };
        serde_json::from_str(text).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// A connection to the broker API that serves one request at a time.
#[async_trait]
pub trait Transport: Send {
    /// Send one request.
    async fn execute(
        &mut self,
        request: &TransportRequest,
    ) -> Result<TransportResponse, TransportError>;
}

/// Builds transports for a pool.
pub trait TransportFactory: Send + Sync {
    /// Transport type produced.
    type Transport: Transport;

    /// Create a fresh transport for `identity`.
    fn create(&self, identity: &str) -> Result<Self::Transport, TransportError>;
}

/// Errors from [`TransportPool`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// The identity already holds a live lease.
    #[error("Transport '{identity}' in pool '{pool}' is already leased")]
    AlreadyLeased {
        /// Pool name.
        pool: String,
        /// Worker identity.
        identity: String,
    },

    /// The factory failed to build a transport.
    #[error("Failed to create transport: {0}")]
    Creation(#[from] TransportError),
}

#[derive(Debug)]
struct LeaseRegistry {
    pool: String,
    leased: Mutex<HashSet<String>>,
}

impl LeaseRegistry {
    // The gauge is set under the lock so the last mutation is the last value published.

    /// Returns the active count after inserting, or `None` if already present.
    fn claim(&self, identity: &str) -> Option<usize> {
        let mut leased = self.leased.lock().unwrap_or_else(PoisonError::into_inner);
        if !leased.insert(identity.to_string()) {
            return None;
        }
        observability::update_active_leases(&self.pool, leased.len());
        Some(leased.len())
    }

    fn reclaim(&self, identity: &str) {
        let mut leased = self.leased.lock().unwrap_or_else(PoisonError::into_inner);
        leased.remove(identity);
        observability::update_active_leases(&self.pool, leased.len());
    }

    fn count(&self) -> usize {
        self.leased
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Issues one exclusive transport per worker identity.
#[derive(Debug)]
pub struct TransportPool<F> {
    factory: F,
    registry: Arc<LeaseRegistry>,
}

impl<F: TransportFactory> TransportPool<F> {
    /// Create a pool that builds transports with `factory`.
    #[must_use]
    pub fn new(name: impl Into<String>, factory: F) -> Self {
        Self {
            factory,
            registry: Arc::new(LeaseRegistry {
                pool: name.into(),
                leased: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.registry.pool
    }

    /// Create a transport owned exclusively by `identity`.
    ///
    /// Call once per worker at startup.
    pub fn acquire(
        &self,
        identity: impl Into<String>,
    ) -> Result<TransportLease<F::Transport>, PoolError> {
        let identity = identity.into();

        let Some(active) = self.registry.claim(&identity) else {
            tracing::error!(
                pool = %self.registry.pool,
                identity = %identity,
                "Transport acquired twice for the same worker"
            );
            return Err(PoolError::AlreadyLeased {
                pool: self.registry.pool.clone(),
                identity,
            });
        };

        let transport = match self.factory.create(&identity) {
            Ok(transport) => transport,
            Err(e) => {
                self.registry.reclaim(&identity);
                return Err(PoolError::Creation(e));
            }
        };

        tracing::debug!(
            pool = %self.registry.pool,
            identity = %identity,
            active,
            "Transport leased"
        );

        Ok(TransportLease {
            identity,
            transport,
            registry: Arc::clone(&self.registry),
            released: false,
            _not_sync: PhantomData,
        })
    }

    /// Destroy a transport and free its identity.
    pub fn release(&self, mut lease: TransportLease<F::Transport>) {
        lease.released = true;
        lease.registry.reclaim(&lease.identity);
        tracing::debug!(
            pool = %self.registry.pool,
            identity = %lease.identity,
            "Transport released"
        );
    }

    /// Number of live leases.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.registry.count()
    }

    /// Whether `identity` currently holds a lease.
    #[must_use]
    pub fn is_leased(&self, identity: &str) -> bool {
        self.registry
            .leased
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(identity)
    }
}

/// Exclusive ownership of one transport.
///
/// Dereferences to the transport. Dropping a lease without
/// [`TransportPool::release`] still frees the identity, with a warning.
#[derive(Debug)]
pub struct TransportLease<T> {
    identity: String,
    transport: T,
    registry: Arc<LeaseRegistry>,
    released: bool,
    _not_sync: PhantomData<Cell<()>>,
}

impl<T> TransportLease<T> {
    /// Worker identity that owns this transport.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl<T> Deref for TransportLease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.transport
    }
}

impl<T> DerefMut for TransportLease<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<T> Drop for TransportLease<T> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::warn!(
            pool = %self.registry.pool,
            identity = %self.identity,
            "Transport lease dropped without release"
        );
        self.registry.reclaim(&self.identity);
    }
}
