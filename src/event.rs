//! The event protocol of a run.
//!
//! Every payload is an owned snapshot taken when the event is emitted, so
//! consumers can keep events around and move them across threads.

use std::fmt;

use crossbeam_channel::Sender;

use crate::{
    hook::HookInfo,
    options::OptionError,
    outcome::{Cancellation, RunMeta, TestRunMeta},
    sink::FailureReceiver,
    tree::{BlockId, TestId, Tree},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    /// `None` for the root block.
    pub id: Option<String>,
    pub name: String,
    pub chain: String,
    pub level: i32,
    pub skipped: bool,
    pub todo: bool,
    pub cancellation: Option<Cancellation>,
}

impl BlockInfo {
    pub(crate) fn snapshot(tree: &Tree, id: BlockId) -> Self {
        let block = tree.block(id);
        Self {
            id: block.id.clone(),
            name: block.name.clone(),
            chain: tree.chain(id),
            level: block.level,
            skipped: tree.is_block_exclusive(id),
            todo: block.flags.todo,
            cancellation: block.flags.cancellation.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestInfo {
    pub id: String,
    pub description: String,
    pub chain: String,
    pub skipped: bool,
    pub todo: bool,
    pub slow: bool,
    pub cancellation: Option<Cancellation>,
    /// `file:line:column` of the declaration.
    pub location: Option<String>,
}

impl TestInfo {
    pub(crate) fn snapshot(tree: &Tree, id: TestId) -> Self {
        let test = tree.test(id);
        Self {
            id: test.id.clone(),
            description: test.description.clone(),
            chain: tree.test_chain(id),
            skipped: tree.is_test_exclusive(id),
            todo: test.flags.todo,
            slow: test.slow,
            cancellation: test.flags.cancellation.clone(),
            location: test.location.map(|loc| loc.to_string()),
        }
    }
}

/// Errors that are not bound to a single unit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum GlobalError {
    #[error(transparent)]
    Option(#[from] OptionError),

    #[error("uncaught failure outside of any test or hook: {0}")]
    Uncaught(String),

    #[error("reporter failed on {event:?}: {message}")]
    Reporter { event: &'static str, message: String },

    #[error("run aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Event {
    EnterBlock {
        block: BlockInfo,
    },
    ExitBlock {
        block: BlockInfo,
    },
    StartTest {
        block: BlockInfo,
        test: TestInfo,
    },
    EndTest {
        block: BlockInfo,
        test: TestInfo,
        meta: TestRunMeta,
    },
    SkipTest {
        block: BlockInfo,
        test: TestInfo,
        runtime: bool,
    },
    StartHook {
        block: BlockInfo,
        test: Option<TestInfo>,
        hook: HookInfo,
    },
    EndHook {
        block: BlockInfo,
        test: Option<TestInfo>,
        hook: HookInfo,
        meta: RunMeta,
    },
    Error {
        err: GlobalError,
    },
    Done,
}

impl Event {
    /// The protocol name of the event, e.g. `start before each hook`.
    pub fn name(&self) -> &'static str {
        use crate::hook::HookKind::*;
        match self {
            Event::EnterBlock { .. } => "enter block",
            Event::ExitBlock { .. } => "exit block",
            Event::StartTest { .. } => "start test",
            Event::EndTest { .. } => "end test",
            Event::SkipTest { .. } => "skip test",
            Event::StartHook { hook, .. } => match hook.kind {
                Before => "start before hook",
                After => "start after hook",
                BeforeEach => "start before each hook",
                AfterEach => "start after each hook",
                BeforeTest => "start before test hook",
                AfterTest => "start after test hook",
            },
            Event::EndHook { hook, .. } => match hook.kind {
                Before => "end before hook",
                After => "end after hook",
                BeforeEach => "end before each hook",
                AfterEach => "end after each hook",
                BeforeTest => "end before test hook",
                AfterTest => "end after test hook",
            },
            Event::Error { .. } => "error",
            Event::Done => "done",
        }
    }

    pub fn test(&self) -> Option<&TestInfo> {
        match self {
            Event::StartTest { test, .. }
            | Event::EndTest { test, .. }
            | Event::SkipTest { test, .. } => Some(test),
            Event::StartHook { test, .. } | Event::EndHook { test, .. } => test.as_ref(),
            _ => None,
        }
    }

    pub fn block(&self) -> Option<&BlockInfo> {
        match self {
            Event::EnterBlock { block }
            | Event::ExitBlock { block }
            | Event::StartTest { block, .. }
            | Event::EndTest { block, .. }
            | Event::SkipTest { block, .. }
            | Event::StartHook { block, .. }
            | Event::EndHook { block, .. } => Some(block),
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.test(), self.block()) {
            (Some(test), _) => write!(f, "{} {}", self.name(), test.chain),
            (None, Some(block)) if block.id.is_some() => write!(f, "{} {}", self.name(), block.chain),
            _ => f.write_str(self.name()),
        }
    }
}

/// Sends events to the consumers of a run.
///
/// Uncaught failures reported outside of any unit are turned into `error` events
/// the next time something is emitted.
#[derive(Debug)]
pub(crate) struct Emitter {
    events: Sender<Event>,
    uncaught: FailureReceiver,
}

impl Emitter {
    pub(crate) fn new(events: Sender<Event>, uncaught: FailureReceiver) -> Self {
        Self { events, uncaught }
    }

    pub(crate) fn emit(&mut self, event: Event) {
        self.flush_uncaught();
        tracing::trace!(event = event.name(), "emit");
        // consumers may be gone, the run goes on without them
        let _ = self.events.send(event);
    }

    pub(crate) fn flush_uncaught(&mut self) {
        while let Ok(err) = self.uncaught.try_recv() {
            tracing::warn!(%err, "uncaught failure outside of any unit");
            let _ = self.events.send(Event::Error {
                err: GlobalError::Uncaught(err.to_string()),
            });
        }
    }
}
