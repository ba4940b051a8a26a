//! The collected tree of blocks and tests.
//!
//! All nodes live in one arena owned by [`Tree`], parents refer to their children
//! by index and children know their parent. The root block always exists, has no
//! name, no id and a level of `-1`.

use std::{fmt, panic::Location};

use serde::Serialize;

use crate::{
    callback::Callback,
    hook::{Hook, HookKind, HookSlot},
    options::NodeOptions,
    outcome::{Cancellation, MAX_TIMEOUT_MS},
    unit::TestContext,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestId(usize);

/// The root block of every tree.
pub const ROOT: BlockId = BlockId(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    Block(BlockId),
    Test(TestId),
}

impl From<BlockId> for NodeId {
    fn from(id: BlockId) -> Self {
        NodeId::Block(id)
    }
}

impl From<TestId> for NodeId {
    fn from(id: TestId) -> Self {
        NodeId::Test(id)
    }
}

/// Skip related flags shared by blocks and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    pub skip: bool,
    pub only: bool,
    pub todo: bool,
    pub cancelled: bool,
    pub cancellation: Option<Cancellation>,
}

impl Flags {
    fn skip(&mut self) {
        self.skip = true;
    }

    fn todo(&mut self) {
        self.skip();
        self.todo = true;
    }

    fn cancel(&mut self, cancellation: Cancellation) {
        self.skip();
        self.cancelled = true;
        self.cancellation = Some(cancellation);
    }
}

#[derive(Debug, Default)]
pub struct BlockHooks {
    pub(crate) before: Vec<Hook>,
    pub(crate) after: Vec<Hook>,
    pub(crate) before_each: Vec<Hook>,
    pub(crate) after_each: Vec<Hook>,
}

impl BlockHooks {
    pub fn list(&self, kind: HookKind) -> &[Hook] {
        match kind {
            HookKind::Before => &self.before,
            HookKind::After => &self.after,
            HookKind::BeforeEach => &self.before_each,
            HookKind::AfterEach => &self.after_each,
            HookKind::BeforeTest | HookKind::AfterTest => &[],
        }
    }

    fn list_mut(&mut self, kind: HookKind) -> Option<&mut Vec<Hook>> {
        match kind {
            HookKind::Before => Some(&mut self.before),
            HookKind::After => Some(&mut self.after),
            HookKind::BeforeEach => Some(&mut self.before_each),
            HookKind::AfterEach => Some(&mut self.after_each),
            HookKind::BeforeTest | HookKind::AfterTest => None,
        }
    }
}

#[derive(Debug)]
pub struct Block {
    pub(crate) name: String,
    pub(crate) parent: Option<BlockId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) hooks: BlockHooks,
    pub(crate) flags: Flags,
    pub(crate) timeout: Option<u64>,
    pub(crate) level: i32,
    pub(crate) id: Option<String>,
    pub(crate) options: Option<NodeOptions>,
}

impl Block {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<BlockId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn hooks(&self) -> &BlockHooks {
        &self.hooks
    }

    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    pub fn own_timeout(&self) -> Option<u64> {
        self.timeout
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

#[derive(Debug)]
pub struct Test {
    pub(crate) description: String,
    pub(crate) block: BlockId,
    pub(crate) callback: Callback<TestContext>,
    pub(crate) flags: Flags,
    pub(crate) slow: bool,
    pub(crate) timeout: Option<u64>,
    pub(crate) before: Vec<Hook>,
    pub(crate) after: Vec<Hook>,
    pub(crate) id: String,
    pub(crate) options: Option<NodeOptions>,
    pub(crate) location: Option<&'static Location<'static>>,
}

impl Test {
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    pub fn is_slow(&self) -> bool {
        self.slow
    }

    pub fn own_timeout(&self) -> Option<u64> {
        self.timeout
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Where the test was declared.
    pub fn location(&self) -> Option<&'static Location<'static>> {
        self.location
    }

    pub fn local_hooks(&self, kind: HookKind) -> &[Hook] {
        match kind {
            HookKind::BeforeTest => &self.before,
            HookKind::AfterTest => &self.after,
            _ => &[],
        }
    }
}

#[derive(Debug)]
pub struct Tree {
    blocks: Vec<Block>,
    tests: Vec<Test>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        let root = Block {
            name: String::new(),
            parent: None,
            children: Vec::new(),
            hooks: BlockHooks::default(),
            flags: Flags::default(),
            timeout: None,
            level: -1,
            id: None,
            options: None,
        };
        Self {
            blocks: vec![root],
            tests: Vec::new(),
        }
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0]
    }

    pub fn test(&self, id: TestId) -> &Test {
        &self.tests[id.0]
    }

    pub(crate) fn test_mut(&mut self, id: TestId) -> &mut Test {
        &mut self.tests[id.0]
    }

    fn next_id(&self, parent: BlockId) -> String {
        let parent = self.block(parent);
        let position = parent.children.len() + 1;
        match &parent.id {
            Some(id) => format!("{id}.{position}"),
            None => position.to_string(),
        }
    }

    pub(crate) fn add_block(&mut self, parent: BlockId, name: impl Into<String>) -> BlockId {
        let block = Block {
            name: name.into(),
            parent: Some(parent),
            children: Vec::new(),
            hooks: BlockHooks::default(),
            flags: Flags::default(),
            timeout: None,
            level: self.block(parent).level + 1,
            id: Some(self.next_id(parent)),
            options: None,
        };
        let id = BlockId(self.blocks.len());
        self.blocks.push(block);
        self.block_mut(parent).children.push(NodeId::Block(id));
        id
    }

    pub(crate) fn add_test(
        &mut self,
        block: BlockId,
        description: impl Into<String>,
        callback: Callback<TestContext>,
    ) -> TestId {
        let test = Test {
            description: description.into(),
            block,
            callback,
            flags: Flags::default(),
            slow: false,
            timeout: None,
            before: Vec::new(),
            after: Vec::new(),
            id: self.next_id(block),
            options: None,
            location: None,
        };
        let id = TestId(self.tests.len());
        self.tests.push(test);
        self.block_mut(block).children.push(NodeId::Test(id));
        id
    }

    pub(crate) fn add_hook(&mut self, block: BlockId, hook: Hook) {
        if let Some(list) = self.block_mut(block).hooks.list_mut(hook.kind) {
            list.push(hook);
        }
    }

    pub(crate) fn add_local_hook(&mut self, test: TestId, hook: Hook) {
        let test = self.test_mut(test);
        match hook.kind {
            HookKind::BeforeTest => test.before.push(hook),
            HookKind::AfterTest => test.after.push(hook),
            _ => {}
        }
    }

    pub(crate) fn hook(&self, slot: HookSlot) -> &Hook {
        match slot {
            HookSlot::Block(block, kind, idx) => &self.block(block).hooks.list(kind)[idx],
            HookSlot::Test(test, kind, idx) => &self.test(test).local_hooks(kind)[idx],
        }
    }

    pub(crate) fn hook_mut(&mut self, slot: HookSlot) -> Option<&mut Hook> {
        match slot {
            HookSlot::Block(block, kind, idx) => self
                .block_mut(block)
                .hooks
                .list_mut(kind)
                .and_then(|list| list.get_mut(idx)),
            HookSlot::Test(test, HookKind::BeforeTest, idx) => self.test_mut(test).before.get_mut(idx),
            HookSlot::Test(test, HookKind::AfterTest, idx) => self.test_mut(test).after.get_mut(idx),
            HookSlot::Test(..) => None,
        }
    }

    /// Blocks from the root down to `block`, both included.
    pub fn ancestry(&self, block: BlockId) -> Vec<BlockId> {
        let mut chain = vec![block];
        let mut current = block;
        while let Some(parent) = self.block(current).parent {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// Names of all blocks down to `block` joined with `" - "`, the root is left out.
    pub fn chain(&self, block: BlockId) -> String {
        self.ancestry(block)
            .into_iter()
            .filter(|id| *id != ROOT)
            .map(|id| self.block(id).name.as_str())
            .collect::<Vec<_>>()
            .join(" - ")
    }

    pub fn test_chain(&self, test: TestId) -> String {
        let test = self.test(test);
        format!("{} : {}", self.chain(test.block), test.description)
    }

    pub fn is_block_exclusive(&self, block: BlockId) -> bool {
        let mut current = Some(block);
        while let Some(id) = current {
            let block = self.block(id);
            if block.flags.skip {
                return true;
            }
            current = block.parent;
        }
        false
    }

    pub fn is_test_exclusive(&self, test: TestId) -> bool {
        let test = self.test(test);
        test.flags.skip || self.is_block_exclusive(test.block)
    }

    pub fn is_exclusive(&self, node: NodeId) -> bool {
        match node {
            NodeId::Block(id) => self.is_block_exclusive(id),
            NodeId::Test(id) => self.is_test_exclusive(id),
        }
    }

    pub fn is_inclusive(&self, node: NodeId) -> bool {
        self.flags(node).only
    }

    /// Whether a non-exclusive only-marked node exists below `block`.
    pub fn has_inclusive(&self, block: BlockId) -> bool {
        self.block(block).children.iter().any(|child| {
            (self.is_inclusive(*child) && !self.is_exclusive(*child))
                || matches!(child, NodeId::Block(id) if self.has_inclusive(*id))
        })
    }

    pub fn flags(&self, node: NodeId) -> &Flags {
        match node {
            NodeId::Block(id) => &self.block(id).flags,
            NodeId::Test(id) => &self.test(id).flags,
        }
    }

    fn flags_mut(&mut self, node: NodeId) -> &mut Flags {
        match node {
            NodeId::Block(id) => &mut self.block_mut(id).flags,
            NodeId::Test(id) => &mut self.test_mut(id).flags,
        }
    }

    pub(crate) fn skip(&mut self, node: NodeId) {
        self.flags_mut(node).skip();
    }

    pub(crate) fn todo(&mut self, node: NodeId) {
        self.flags_mut(node).todo();
    }

    pub(crate) fn only(&mut self, node: NodeId) {
        self.flags_mut(node).only = true;
    }

    /// Cancel `node` and, for blocks, everything below it.
    pub(crate) fn cancel(&mut self, node: NodeId, cancellation: Cancellation) {
        self.flags_mut(node).cancel(cancellation.clone());
        if let NodeId::Block(id) = node {
            for child in self.block(id).children.clone() {
                self.cancel(child, cancellation.clone());
            }
        }
    }

    /// Mark every test below `block` as slow.
    pub(crate) fn slow_block(&mut self, block: BlockId) {
        for child in self.block(block).children.clone() {
            match child {
                NodeId::Block(id) => self.slow_block(id),
                NodeId::Test(id) => self.test_mut(id).slow = true,
            }
        }
    }

    pub(crate) fn set_timeout(&mut self, node: NodeId, ms: u64) {
        let ms = Some(ms.min(MAX_TIMEOUT_MS));
        match node {
            NodeId::Block(id) => self.block_mut(id).timeout = ms,
            NodeId::Test(id) => self.test_mut(id).timeout = ms,
        }
    }

    /// The timeout of `block`, inherited from the closest ancestor that has one.
    pub fn block_timeout(&self, block: BlockId) -> Option<u64> {
        let mut current = Some(block);
        while let Some(id) = current {
            let block = self.block(id);
            if block.timeout.is_some() {
                return block.timeout;
            }
            current = block.parent;
        }
        None
    }

    pub fn test_timeout(&self, test: TestId) -> Option<u64> {
        let test = self.test(test);
        test.timeout.or_else(|| self.block_timeout(test.block))
    }

    pub fn hook_timeout(&self, hook: &Hook) -> Option<u64> {
        hook.timeout.or_else(|| self.block_timeout(hook.block))
    }

    pub fn structure(&self) -> Vec<Structure> {
        self.structure_of(ROOT)
    }

    fn structure_of(&self, block: BlockId) -> Vec<Structure> {
        self.block(block)
            .children
            .iter()
            .map(|child| match *child {
                NodeId::Block(id) => {
                    let block = self.block(id);
                    Structure::Block {
                        key: format!("{} {}", block.id.as_deref().unwrap_or_default(), block.name),
                        children: self.structure_of(id),
                    }
                }
                NodeId::Test(id) => {
                    let test = self.test(id);
                    Structure::Test {
                        id: test.id.clone(),
                        description: test.description.clone(),
                    }
                }
            })
            .collect()
    }
}

/// A listing of the collected tree, as handed to listing collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Structure {
    Block {
        key: String,
        children: Vec<Structure>,
    },
    Test {
        id: String,
        description: String,
    },
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write(s: &Structure, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
            let indent = "  ".repeat(depth);
            match s {
                Structure::Block { key, children } => {
                    writeln!(f, "{indent}{key}")?;
                    children.iter().try_for_each(|child| write(child, f, depth + 1))
                }
                Structure::Test { id, description } => writeln!(f, "{indent}{id} {description}"),
            }
        }
        write(self, f, 0)
    }
}
