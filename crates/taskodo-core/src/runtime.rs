use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{SchedulerError, TaskError};

/// A deferred call: the "function" half of a task.
///
/// `name()` identifies the function and is the default incompatibility tag.
/// Arguments are positional JSON values; the scheduler never looks inside.
#[async_trait]
pub trait TaskFn: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, args: Vec<Value>) -> Result<Value, TaskError>;
}

/// Adapts a blocking closure. Each call runs on tokio's blocking pool so a
/// long `sleep` or CPU loop never stalls the scheduler.
pub struct FnTask<F> {
    name: String,
    f: Arc<F>,
}

impl<F> FnTask<F>
where
    F: Fn(Vec<Value>) -> Result<Value, TaskError> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }
}

#[async_trait]
impl<F> TaskFn for FnTask<F>
where
    F: Fn(Vec<Value>) -> Result<Value, TaskError> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, args: Vec<Value>) -> Result<Value, TaskError> {
        let f = Arc::clone(&self.f);
        match tokio::task::spawn_blocking(move || f(args)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(TaskError::Panicked(panic_message(e.into_panic()))),
            Err(e) => Err(TaskError::failed(e.to_string())),
        }
    }
}

/// Adapts an async closure returning a future.
pub struct AsyncFnTask<F> {
    name: String,
    f: F,
}

impl<F, Fut> AsyncFnTask<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> TaskFn for AsyncFnTask<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, args: Vec<Value>) -> Result<Value, TaskError> {
        (self.f)(args).await
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Registry of functions (name -> deferred call).
///
/// Design:
/// - Built during initialization (mutable).
/// - Read when building requests by name (immutable).
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn TaskFn>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Register a function under its own name.
    pub fn register(&mut self, func: Arc<dyn TaskFn>) -> Result<(), SchedulerError> {
        let name = func.name().to_string();
        if self.functions.contains_key(&name) {
            return Err(SchedulerError::DuplicateFunction(name));
        }
        self.functions.insert(name, func);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskFn>> {
        self.functions.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
