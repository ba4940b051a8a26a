use std::fmt;

use crate::{
    callback::Callback,
    outcome::{MAX_TIMEOUT_MS, UnitError},
    tree::BlockId,
    unit::HookContext,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Before,
    After,
    BeforeEach,
    AfterEach,
    BeforeTest,
    AfterTest,
}

impl HookKind {
    /// The name used in event names, e.g. `before each`.
    pub fn label(&self) -> &'static str {
        match self {
            HookKind::Before => "before",
            HookKind::After => "after",
            HookKind::BeforeEach => "before each",
            HookKind::AfterEach => "after each",
            HookKind::BeforeTest => "before test",
            HookKind::AfterTest => "after test",
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, HookKind::BeforeTest | HookKind::AfterTest)
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct Hook {
    pub(crate) kind: HookKind,
    pub(crate) description: String,
    pub(crate) callback: Callback<HookContext>,
    pub(crate) block: BlockId,
    pub(crate) timeout: Option<u64>,
    pub(crate) fired: bool,
    pub(crate) failed: Option<UnitError>,
}

impl Hook {
    pub(crate) fn new(
        kind: HookKind,
        description: impl Into<String>,
        callback: Callback<HookContext>,
        block: BlockId,
    ) -> Self {
        Self {
            kind,
            description: description.into(),
            callback,
            block,
            timeout: None,
            fired: false,
            failed: None,
        }
    }

    pub fn kind(&self) -> HookKind {
        self.kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The block the hook was registered on, test local hooks use the test's block.
    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn own_timeout(&self) -> Option<u64> {
        self.timeout
    }

    pub fn set_timeout(&mut self, ms: u64) {
        self.timeout = Some(ms.min(MAX_TIMEOUT_MS));
    }

    pub fn fired(&self) -> bool {
        self.fired
    }

    pub fn failed(&self) -> Option<&UnitError> {
        self.failed.as_ref()
    }

    pub fn info(&self) -> HookInfo {
        HookInfo {
            kind: self.kind,
            description: self.description.clone(),
        }
    }
}

/// Snapshot of a hook as carried by events and cancellations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookInfo {
    pub kind: HookKind,
    pub description: String,
}

/// Where the hook lives in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HookSlot {
    Block(BlockId, HookKind, usize),
    Test(crate::tree::TestId, HookKind, usize),
}
