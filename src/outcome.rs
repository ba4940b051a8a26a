use std::{fmt::Display, time::Duration};

use crate::hook::HookInfo;

/// Largest timeout a unit may ask for, everything above is clamped to this.
pub const MAX_TIMEOUT_MS: u64 = 2_u64.pow(31) - 1;

/// The error a single hook or test produced.
///
/// Unit errors are cheap to clone since they are attached to events, stored on hooks
/// and reused as cancellation reasons for whole subtrees.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum UnitError {
    /// The callback returned an error.
    #[error("{0}")]
    Failed(String),

    /// The callback panicked.
    #[error("{message}")]
    Panicked {
        message: String,
        location: Option<String>,
    },

    /// A failure was reported to the failure sink while the unit was in flight.
    #[error("{0}")]
    Uncaught(String),

    /// The completion callback was dropped without being called.
    #[error("completion callback dropped without being called")]
    Dropped,

    /// The unit did not settle in time.
    #[error("Timeout of {ms}ms exceeded")]
    Timeout {
        ms: u64,
        original: Option<Box<UnitError>>,
    },
}

impl UnitError {
    pub fn failed(message: impl Display) -> Self {
        Self::Failed(message.to_string())
    }

    /// Build a timeout error, keeping whatever was captured before as the original.
    ///
    /// Wrapping a timeout in a timeout keeps the innermost original.
    pub fn timeout(ms: u64, captured: Option<UnitError>) -> Self {
        let original = match captured {
            Some(UnitError::Timeout { original, .. }) => original,
            Some(err) => Some(Box::new(err)),
            None => None,
        };
        Self::Timeout { ms, original }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn original(&self) -> Option<&UnitError> {
        match self {
            Self::Timeout { original, .. } => original.as_deref(),
            _ => None,
        }
    }
}

/// What a callback settles with.
#[derive(Debug)]
pub struct CallbackResult(pub Result<(), UnitError>);

impl From<()> for CallbackResult {
    fn from(_: ()) -> Self {
        Self(Ok(()))
    }
}

impl<E: Display> From<Result<(), E>> for CallbackResult {
    fn from(v: Result<(), E>) -> Self {
        CallbackResult(v.map_err(UnitError::failed))
    }
}

/// Result of running a hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMeta {
    pub err: Option<UnitError>,
    pub elapsed: Duration,
}

impl RunMeta {
    pub fn passed(&self) -> bool {
        self.err.is_none()
    }
}

/// Result of running a test, as carried by `end test`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRunMeta {
    pub err: Option<UnitError>,
    pub elapsed: Duration,
    pub skipped: bool,
}

impl TestRunMeta {
    pub fn passed(&self) -> bool {
        self.err.is_none() && !self.skipped
    }

    pub fn failed(&self) -> bool {
        self.err.is_some()
    }
}

/// Which kind of hook failure cancelled a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelKind {
    BeforeHook,
    BeforeEach,
    BeforeTest,
}

impl CancelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelKind::BeforeHook => "beforeHook",
            CancelKind::BeforeEach => "beforeEach",
            CancelKind::BeforeTest => "beforeTest",
        }
    }
}

/// Why a node was taken out of execution at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cancellation {
    pub reason: UnitError,
    pub hook: HookInfo,
    pub kind: CancelKind,
}
