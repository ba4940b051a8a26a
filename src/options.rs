//! Per-node options, evaluated before a run starts.
//!
//! Options are attached at collection time and only looked at by the resolver, so
//! predicates may be async and may depend on state that only exists once the run
//! begins.

use std::{fmt, future::Future, sync::Arc};

use futures::{FutureExt, future::BoxFuture};

use crate::{
    callback::{Callback, IntoCallback},
    unit::HookContext,
};

type ValueFn = dyn Fn() -> BoxFuture<'static, OptionValue> + Send + Sync;

/// A loosely typed option value.
#[derive(Clone)]
pub enum OptionValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Func(Arc<ValueFn>),
}

impl OptionValue {
    /// A value computed when the options are prepared.
    pub fn from_fn<F, Fut, T>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Into<OptionValue> + 'static,
    {
        Self::Func(Arc::new(move || f().map(Into::into).boxed()))
    }

    /// Call functions, plain values are returned as they are.
    async fn evaluate(&self) -> OptionValue {
        match self {
            OptionValue::Func(f) => f().await,
            value => value.clone(),
        }
    }
}

impl fmt::Debug for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Self::Number(v) => f.debug_tuple("Number").field(v).finish(),
            Self::Text(v) => f.debug_tuple("Text").field(v).finish(),
            Self::Func(_) => write!(f, "Func(...)"),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<u64> for OptionValue {
    fn from(value: u64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<i32> for OptionValue {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionError {
    #[error("{message}")]
    InvalidArgument {
        option: &'static str,
        message: &'static str,
    },
}

impl OptionError {
    fn invalid(option: &'static str, message: &'static str) -> Self {
        Self::InvalidArgument { option, message }
    }
}

/// Options for a block or a test.
///
/// Hooks given here are only used by tests.
#[derive(Debug, Clone, Default)]
pub struct NodeOptions {
    pub skip: Option<OptionValue>,
    pub timeout: Option<OptionValue>,
    pub before: Vec<(String, Callback<HookContext>)>,
    pub after: Vec<(String, Callback<HookContext>)>,
}

impl NodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skip(self, skip: impl Into<OptionValue>) -> Self {
        Self {
            skip: Some(skip.into()),
            ..self
        }
    }

    pub fn with_timeout(self, timeout: impl Into<OptionValue>) -> Self {
        Self {
            timeout: Some(timeout.into()),
            ..self
        }
    }

    pub fn with_before<M>(self, callback: impl IntoCallback<HookContext, M>) -> Self {
        self.with_before_named("", callback)
    }

    pub fn with_before_named<M>(
        mut self,
        description: impl Into<String>,
        callback: impl IntoCallback<HookContext, M>,
    ) -> Self {
        self.before
            .push((description.into(), callback.into_callback()));
        self
    }

    pub fn with_after<M>(self, callback: impl IntoCallback<HookContext, M>) -> Self {
        self.with_after_named("", callback)
    }

    pub fn with_after_named<M>(
        mut self,
        description: impl Into<String>,
        callback: impl IntoCallback<HookContext, M>,
    ) -> Self {
        self.after
            .push((description.into(), callback.into_callback()));
        self
    }
}

/// Evaluate a skip option.
pub(crate) async fn prepare_skip(value: &OptionValue) -> Result<bool, OptionError> {
    match value.evaluate().await {
        OptionValue::Bool(skip) => Ok(skip),
        _ => Err(OptionError::invalid(
            "skip",
            "skip: only functions and booleans are allowed",
        )),
    }
}

/// Evaluate a timeout option into milliseconds.
pub(crate) async fn prepare_timeout(value: &OptionValue) -> Result<u64, OptionError> {
    match value.evaluate().await {
        OptionValue::Number(ms) if ms.is_finite() && ms < 0.0 => Err(OptionError::invalid(
            "timeout",
            "timeout: cannot be negative",
        )),
        OptionValue::Number(ms) if ms.is_finite() => Ok(ms as u64),
        _ => Err(OptionError::invalid(
            "timeout",
            "timeout: only functions and numbers are allowed",
        )),
    }
}
