//! Handler table for dispatching `exec` requests by function name.
//!
//! Each connector owns one table. A handler receives the JSON argument and
//! the optional payload of the `exec` frame and resolves to a [`Reply`] (or
//! a [`RemoteError`] that is sent back as the `error` of the response).
//!
//! # Example
//!
//! ```
//! use node_connector::connector::{HandlerTable, Reply};
//! use serde_json::json;
//!
//! let handlers = HandlerTable::new()
//!     .handle("echo", |data: serde_json::Value, payload| async move {
//!         Ok(Reply::new(data).with_optional_payload(payload))
//!     })
//!     .handle("add", |(a, b): (i64, i64), _| async move {
//!         Ok(Reply::new(json!(a + b)))
//!     });
//!
//! assert!(handlers.contains("echo"));
//! assert_eq!(handlers.len(), 2);
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub use futures_util::future::BoxFuture;

use crate::error::{ErrorCode, RemoteError, Result};

/// Result type for handler functions.
pub type HandlerResult = std::result::Result<Reply, RemoteError>;

/// Result of a call: JSON data plus an optional binary payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reply {
    /// JSON result.
    pub data: Value,
    /// Binary payload, sent after the metadata.
    pub payload: Option<Bytes>,
}

impl Reply {
    /// Reply with JSON data and no payload.
    pub fn new(data: Value) -> Self {
        Self {
            data,
            payload: None,
        }
    }

    /// Reply with `null` data and no payload.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Serialize any value into the reply data.
    pub fn serialize<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::new(serde_json::to_value(value)?))
    }

    /// Attach a binary payload.
    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Attach a payload if there is one.
    pub fn with_optional_payload(mut self, payload: Option<Bytes>) -> Self {
        self.payload = payload;
        self
    }

    /// Deserialize the reply data.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.data)?)
    }
}

/// Trait for handler functions.
pub trait Handler: Send + Sync + 'static {
    /// Handle a request with its raw JSON argument and payload.
    fn call(&self, data: Value, payload: Option<Bytes>) -> BoxFuture<'static, HandlerResult>;
}

/// Wrapper that deserializes the argument before calling the handler.
pub struct TypedHandler<F, T, Fut>
where
    F: Fn(T, Option<Bytes>) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> TypedHandler<F, T, Fut>
where
    F: Fn(T, Option<Bytes>) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut> Handler for TypedHandler<F, T, Fut>
where
    F: Fn(T, Option<Bytes>) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, data: Value, payload: Option<Bytes>) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match serde_json::from_value(data) {
            Ok(v) => v,
            Err(e) => {
                let err = RemoteError::new(format!("Invalid argument: {}", e))
                    .with_code(ErrorCode::InvalidPayloadArgument);
                return Box::pin(async move { Err(err) });
            }
        };

        Box::pin((self.handler)(parsed, payload))
    }
}

/// Function-name to handler map for one connector.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerTable {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, builder style.
    pub fn handle<F, T, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(T, Option<Bytes>) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(name, handler);
        self
    }

    /// Register a handler under `name`, replacing any previous one.
    pub fn register<F, T, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(T, Option<Bytes>) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.insert(name, TypedHandler::new(handler));
    }

    /// Register a pre-built [`Handler`] implementation.
    pub fn insert<H: Handler>(&mut self, name: &str, handler: H) {
        self.handlers.insert(name.to_string(), Arc::new(handler));
    }

    /// Get a handler by function name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    /// Check if a function is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

/// Run a handler to completion, turning panics into
/// [`ErrorCode::HandlerContractViolation`] errors.
///
/// Both a panic while building the future and a panic while polling it are
/// caught.
pub(crate) async fn invoke(
    handler: Arc<dyn Handler>,
    data: Value,
    payload: Option<Bytes>,
) -> HandlerResult {
    let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| handler.call(data, payload))) {
        Ok(fut) => fut,
        Err(panic) => return Err(contract_violation(panic)),
    };

    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(contract_violation(panic)),
    }
}

fn contract_violation(panic: Box<dyn Any + Send>) -> RemoteError {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    RemoteError::new(format!("Handler panicked: {}", detail))
        .with_code(ErrorCode::HandlerContractViolation)
}
