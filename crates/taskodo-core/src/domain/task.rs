use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::TaskId;
use crate::error::SchedulerError;
use crate::runtime::{FunctionRegistry, TaskFn};

/// A submission: the deferred call plus its constraints.
///
/// Built with the `with_*` methods and handed to `Scheduler::submit`.
/// Anything left unset falls back to the scheduler defaults (generated id,
/// configured timeout, tag = function name).
pub struct TaskRequest {
    pub(crate) func: Arc<dyn TaskFn>,
    pub(crate) args: Vec<Value>,
    pub(crate) id: Option<TaskId>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) depend: HashSet<TaskId>,
    pub(crate) incompatible: HashSet<String>,
    pub(crate) tag: Option<String>,
}

impl TaskRequest {
    pub fn new(func: Arc<dyn TaskFn>, args: Vec<Value>) -> Self {
        Self {
            func,
            args,
            id: None,
            timeout: None,
            depend: HashSet::new(),
            incompatible: HashSet::new(),
            tag: None,
        }
    }

    /// Build a request for a function registered under `name`.
    pub fn named(
        registry: &FunctionRegistry,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Self, SchedulerError> {
        let func = registry
            .get(name)
            .ok_or_else(|| SchedulerError::UnknownFunction(name.to_string()))?;
        Ok(Self::new(func, args))
    }

    /// Use a caller-chosen id. An empty id means "generate one".
    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        let id = id.into();
        self.id = (!id.is_empty()).then_some(id);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Tasks that must reach `Finished` before this one is runnable.
    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.depend.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Tags that must not be `Started` anywhere while this task runs.
    pub fn incompatible_with<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.incompatible.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Override the incompatibility tag (defaults to the function name).
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn id(&self) -> Option<&TaskId> {
        self.id.as_ref()
    }

    pub fn function_name(&self) -> &str {
        self.func.name()
    }
}

impl fmt::Debug for TaskRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRequest")
            .field("function", &self.func.name())
            .field("args", &self.args)
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .field("depend", &self.depend)
            .field("incompatible", &self.incompatible)
            .field("tag", &self.tag)
            .finish()
    }
}
