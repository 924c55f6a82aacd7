//! Serializable callables
//!
//! A callable travels over the wire as a [`CallablePayload`]: the name of the
//! handler to run and its JSON input. Workers resolve the name through a
//! [`CallableRegistry`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Error raised by a callable, carried back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CallableError {
    /// Error class (e.g. "DivideByZero")
    pub kind: String,
    /// Human readable description
    pub message: String,
}

impl CallableError {
    /// Create a new callable error
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub(crate) fn unknown_callable(name: &str) -> Self {
        Self::new("UnknownCallable", format!("no handler registered for {name}"))
    }

    pub(crate) fn panic(message: impl Into<String>) -> Self {
        Self::new("Panic", message)
    }
}

/// Result of running a callable
pub type CallableResult = Result<serde_json::Value, CallableError>;

/// Wire form of a callable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallablePayload {
    /// Registered handler name
    pub name: String,
    /// Handler input
    pub input: serde_json::Value,
}

impl CallablePayload {
    /// Create a payload for a named handler
    pub fn new(name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            input,
        }
    }

    /// Encode a typed callable
    pub fn from_callable<C: DistributedCallable>(callable: &C) -> Result<Self, serde_json::Error> {
        Ok(Self {
            name: C::NAME.to_string(),
            input: serde_json::to_value(callable)?,
        })
    }
}

/// A unit of work that can be shipped to a worker
///
/// # Example
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Divide { a: i64, b: i64 }
///
/// #[async_trait]
/// impl DistributedCallable for Divide {
///     const NAME: &'static str = "divide";
///     type Output = i64;
///
///     async fn call(self) -> Result<i64, CallableError> {
///         if self.b == 0 {
///             return Err(CallableError::new("DivideByZero", "b is zero"));
///         }
///         Ok(self.a / self.b)
///     }
/// }
/// ```
#[async_trait]
pub trait DistributedCallable: Serialize + DeserializeOwned + Send + 'static {
    /// Name under which workers register this callable
    const NAME: &'static str;

    /// Result type, returned to the caller through its task future
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Execute the callable on the worker
    async fn call(self) -> Result<Self::Output, CallableError>;
}

/// Type-erased callable handler
pub type CallableHandler =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, CallableResult> + Send + Sync>;

/// Maps callable names to the code that runs them
#[derive(Clone, Default)]
pub struct CallableRegistry {
    handlers: HashMap<String, CallableHandler>,
}

impl CallableRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed callable under its `NAME`
    pub fn register<C: DistributedCallable>(&mut self) -> &mut Self {
        let handler: CallableHandler = Arc::new(|input| {
            Box::pin(async move {
                let callable: C = serde_json::from_value(input)
                    .map_err(|e| CallableError::new("InputDecode", e.to_string()))?;
                let output = callable.call().await?;
                serde_json::to_value(output)
                    .map_err(|e| CallableError::new("OutputEncode", e.to_string()))
            })
        });
        self.handlers.insert(C::NAME.to_string(), handler);
        self
    }

    /// Register a raw handler working on JSON values
    pub fn register_fn<F, Fut>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = CallableResult> + Send + 'static,
    {
        let handler: CallableHandler = Arc::new(move |input| Box::pin(handler(input)));
        self.handlers.insert(name.to_string(), handler);
        self
    }

    /// Look up a handler
    pub fn get(&self, name: &str) -> Option<CallableHandler> {
        self.handlers.get(name).cloned()
    }

    /// Registered names
    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

impl std::fmt::Debug for CallableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallableRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
