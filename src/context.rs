//! The collection DSL.
//!
//! A [`Context`] collects blocks, tests and hooks into a [`Tree`]:
//!
//! ```
//! use kispec::prelude::*;
//!
//! let mut cx = Engine::default().context();
//! cx.describe("math", |cx| {
//!     cx.before_each(|_| ());
//!     cx.it("adds", |_| assert_eq!(1 + 1, 2));
//!     cx.skip().it("divides by zero", |_| ());
//! })
//! .unwrap();
//! ```

use std::{panic::Location, sync::Arc};

use futures::future::{BoxFuture, LocalBoxFuture};

use crate::{
    Run,
    callback::IntoCallback,
    config::Config,
    hook::{Hook, HookKind},
    options::NodeOptions,
    run::StopHandle,
    tree::{BlockId, NodeId, ROOT, Structure, TestId, Tree},
    unit::{HookContext, TestContext},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CollectError {
    #[error("A describe must have a name")]
    MissingName,

    #[error("It is not allowed to use asynchronous functions as a describe callback")]
    DescribeMustBeSync,

    #[error("describe body failed: {0}")]
    Body(String),
}

/// Names accepted by [`Context::describe`], one block is opened per name.
pub trait Names {
    fn into_names(self) -> Vec<String>;
}

impl Names for &str {
    fn into_names(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl Names for String {
    fn into_names(self) -> Vec<String> {
        vec![self]
    }
}

impl Names for &String {
    fn into_names(self) -> Vec<String> {
        vec![self.clone()]
    }
}

impl<const N: usize> Names for [&str; N] {
    fn into_names(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl Names for &[&str] {
    fn into_names(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl Names for Vec<&str> {
    fn into_names(self) -> Vec<String> {
        self.into_iter().map(String::from).collect()
    }
}

impl Names for Vec<String> {
    fn into_names(self) -> Vec<String> {
        self
    }
}

/// Return types of describe bodies.
///
/// Bodies run synchronously, returning a future is an error.
pub trait DescribeReturn {
    fn into_outcome(self) -> Result<(), CollectError>;
}

impl DescribeReturn for () {
    fn into_outcome(self) -> Result<(), CollectError> {
        Ok(())
    }
}

impl<E: std::fmt::Display> DescribeReturn for Result<(), E> {
    fn into_outcome(self) -> Result<(), CollectError> {
        self.map_err(|err| CollectError::Body(err.to_string()))
    }
}

impl<T> DescribeReturn for BoxFuture<'_, T> {
    fn into_outcome(self) -> Result<(), CollectError> {
        Err(CollectError::DescribeMustBeSync)
    }
}

impl<T> DescribeReturn for LocalBoxFuture<'_, T> {
    fn into_outcome(self) -> Result<(), CollectError> {
        Err(CollectError::DescribeMustBeSync)
    }
}

enum GateState {
    Ready(bool),
    Pending(BoxFuture<'static, bool>),
}

/// A pending decision whether the whole root is skipped.
pub struct Gate(GateState);

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            GateState::Ready(skip) => f.debug_tuple("Gate").field(skip).finish(),
            GateState::Pending(_) => write!(f, "Gate(...)"),
        }
    }
}

impl Gate {
    pub(crate) async fn settle(self) -> bool {
        match self.0 {
            GateState::Ready(skip) => skip,
            GateState::Pending(fut) => fut.await,
        }
    }
}

/// Predicates accepted by [`Context::skip_if`].
pub trait SkipGate<Marker> {
    fn into_gate(self) -> Gate;
}

impl SkipGate<()> for bool {
    fn into_gate(self) -> Gate {
        Gate(GateState::Ready(self))
    }
}

impl<F> SkipGate<fn() -> bool> for F
where
    F: FnOnce() -> bool,
{
    fn into_gate(self) -> Gate {
        Gate(GateState::Ready(self()))
    }
}

impl<F> SkipGate<fn() -> BoxFuture<'static, bool>> for F
where
    F: FnOnce() -> BoxFuture<'static, bool>,
{
    fn into_gate(self) -> Gate {
        Gate(GateState::Pending(self()))
    }
}

/// Collects the tree of a run.
#[derive(Debug)]
pub struct Context {
    tree: Tree,
    stack: Vec<BlockId>,
    gate: Option<Gate>,
    config: Arc<Config>,
    stop: StopHandle,
}

impl Context {
    pub(crate) fn new(config: Arc<Config>) -> Self {
        Self {
            tree: Tree::new(),
            stack: Vec::new(),
            gate: None,
            config,
            stop: StopHandle::default(),
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn root(&self) -> BlockId {
        ROOT
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A handle that stops the run once it is started, usable from inside callbacks.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    fn current(&self) -> BlockId {
        self.stack.last().copied().unwrap_or(ROOT)
    }

    fn open<N, F, R>(
        &mut self,
        names: N,
        options: Option<NodeOptions>,
        body: F,
    ) -> Result<BlockId, CollectError>
    where
        N: Names,
        F: FnOnce(&mut Context) -> R,
        R: DescribeReturn,
    {
        let names = names.into_names();
        if names.is_empty() {
            return Err(CollectError::MissingName);
        }

        let depth = self.stack.len();
        let mut block = self.current();
        for name in names {
            block = self.tree.add_block(self.current(), name);
            self.stack.push(block);
        }
        self.tree.block_mut(block).options = options;

        let outcome = body(self).into_outcome();
        self.stack.truncate(depth);
        outcome.map(|_| block)
    }

    /// Open one nested block per name and collect `body` into the innermost one.
    pub fn describe<N, F, R>(&mut self, names: N, body: F) -> Result<BlockId, CollectError>
    where
        N: Names,
        F: FnOnce(&mut Context) -> R,
        R: DescribeReturn,
    {
        self.open(names, None, body)
    }

    pub fn context<N, F, R>(&mut self, names: N, body: F) -> Result<BlockId, CollectError>
    where
        N: Names,
        F: FnOnce(&mut Context) -> R,
        R: DescribeReturn,
    {
        self.describe(names, body)
    }

    #[track_caller]
    fn add_test<M>(
        &mut self,
        description: String,
        callback: impl IntoCallback<TestContext, M>,
        options: Option<NodeOptions>,
    ) -> TestId {
        let block = self.current();
        let id = self
            .tree
            .add_test(block, description, callback.into_callback());
        let test = self.tree.test_mut(id);
        test.options = options;
        test.location = Some(Location::caller());
        id
    }

    #[track_caller]
    pub fn it<M>(
        &mut self,
        description: impl Into<String>,
        callback: impl IntoCallback<TestContext, M>,
    ) -> TestHandle<'_> {
        let id = self.add_test(description.into(), callback, None);
        TestHandle {
            tree: &mut self.tree,
            id,
        }
    }

    #[track_caller]
    pub fn specify<M>(
        &mut self,
        description: impl Into<String>,
        callback: impl IntoCallback<TestContext, M>,
    ) -> TestHandle<'_> {
        self.it(description, callback)
    }

    fn hook<M>(
        &mut self,
        kind: HookKind,
        description: String,
        callback: impl IntoCallback<HookContext, M>,
    ) {
        let block = self.current();
        let hook = Hook::new(kind, description, callback.into_callback(), block);
        self.tree.add_hook(block, hook);
    }

    pub fn before<M>(&mut self, callback: impl IntoCallback<HookContext, M>) {
        self.hook(HookKind::Before, String::new(), callback)
    }

    pub fn before_named<M>(
        &mut self,
        description: impl Into<String>,
        callback: impl IntoCallback<HookContext, M>,
    ) {
        self.hook(HookKind::Before, description.into(), callback)
    }

    pub fn after<M>(&mut self, callback: impl IntoCallback<HookContext, M>) {
        self.hook(HookKind::After, String::new(), callback)
    }

    pub fn after_named<M>(
        &mut self,
        description: impl Into<String>,
        callback: impl IntoCallback<HookContext, M>,
    ) {
        self.hook(HookKind::After, description.into(), callback)
    }

    pub fn before_each<M>(&mut self, callback: impl IntoCallback<HookContext, M>) {
        self.hook(HookKind::BeforeEach, String::new(), callback)
    }

    pub fn before_each_named<M>(
        &mut self,
        description: impl Into<String>,
        callback: impl IntoCallback<HookContext, M>,
    ) {
        self.hook(HookKind::BeforeEach, description.into(), callback)
    }

    pub fn after_each<M>(&mut self, callback: impl IntoCallback<HookContext, M>) {
        self.hook(HookKind::AfterEach, String::new(), callback)
    }

    pub fn after_each_named<M>(
        &mut self,
        description: impl Into<String>,
        callback: impl IntoCallback<HookContext, M>,
    ) {
        self.hook(HookKind::AfterEach, description.into(), callback)
    }

    fn chain(&mut self, modifiers: Modifiers) -> Chain<'_> {
        Chain {
            cx: self,
            modifiers,
            options: None,
        }
    }

    pub fn skip(&mut self) -> Chain<'_> {
        self.chain(Modifiers::default().with_skip())
    }

    pub fn only(&mut self) -> Chain<'_> {
        self.chain(Modifiers::default().with_only())
    }

    pub fn todo(&mut self) -> Chain<'_> {
        self.chain(Modifiers::default().with_todo())
    }

    pub fn slow(&mut self) -> Chain<'_> {
        self.chain(Modifiers::default().with_slow())
    }

    /// The innermost open block, the root outside of any describe body.
    pub fn this(&mut self) -> BlockHandle<'_> {
        let id = self.current();
        BlockHandle {
            tree: &mut self.tree,
            id,
        }
    }

    /// Skip the whole run if `predicate` holds.
    ///
    /// Functions are called right away, a returned future is awaited before the
    /// run is resolved. A later call replaces an earlier one.
    pub fn skip_if<M>(&mut self, predicate: impl SkipGate<M>) {
        self.gate = Some(predicate.into_gate());
    }

    /// Await the root skip gate, returns whether the root is skipped.
    pub async fn settle_gate(&mut self) -> bool {
        if let Some(gate) = self.gate.take() {
            if gate.settle().await {
                self.tree.skip(ROOT.into());
            }
        }
        self.tree.block(ROOT).flags().skip
    }

    /// Set the timeout of the root block, inherited by everything without its own.
    pub fn timeout(&mut self, ms: u64) {
        self.tree.set_timeout(ROOT.into(), ms);
    }

    /// Open blocks that stay open for the rest of the collection.
    pub fn prefix(&mut self, names: impl Names) -> Result<BlockId, CollectError> {
        let names = names.into_names();
        if names.is_empty() {
            return Err(CollectError::MissingName);
        }
        let mut block = self.current();
        for name in names {
            block = self.tree.add_block(self.current(), name);
            self.stack.push(block);
        }
        Ok(block)
    }

    pub fn structure(&self) -> Vec<Structure> {
        self.tree.structure()
    }

    /// Resolve and execute the collected tree on the current tokio runtime.
    pub fn start(self) -> Run {
        Run::spawn(self)
    }

    pub(crate) fn into_parts(self) -> (Tree, Option<Gate>, Arc<Config>, StopHandle) {
        (self.tree, self.gate, self.config, self.stop)
    }
}

/// A set of chained modifiers, applied once the node exists.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Modifiers {
    pub skip: bool,
    pub only: bool,
    pub todo: bool,
    pub slow: bool,
}

impl Modifiers {
    pub fn with_skip(self) -> Self {
        Self { skip: true, ..self }
    }

    pub fn with_only(self) -> Self {
        Self { only: true, ..self }
    }

    pub fn with_todo(self) -> Self {
        Self { todo: true, ..self }
    }

    pub fn with_slow(self) -> Self {
        Self { slow: true, ..self }
    }

    // todo implies skip, so skip is applied first whatever the chain order was
    fn apply(self, tree: &mut Tree, node: NodeId) {
        if self.skip {
            tree.skip(node);
        }
        if self.todo {
            tree.todo(node);
        }
        if self.only {
            tree.only(node);
        }
        if self.slow {
            match node {
                NodeId::Block(id) => tree.slow_block(id),
                NodeId::Test(id) => tree.test_mut(id).slow = true,
            }
        }
    }
}

/// Builder returned by [`Context::skip`] and friends.
pub struct Chain<'c> {
    cx: &'c mut Context,
    modifiers: Modifiers,
    options: Option<NodeOptions>,
}

impl<'c> Chain<'c> {
    pub fn skip(self) -> Self {
        Self {
            modifiers: self.modifiers.with_skip(),
            ..self
        }
    }

    pub fn only(self) -> Self {
        Self {
            modifiers: self.modifiers.with_only(),
            ..self
        }
    }

    pub fn todo(self) -> Self {
        Self {
            modifiers: self.modifiers.with_todo(),
            ..self
        }
    }

    pub fn slow(self) -> Self {
        Self {
            modifiers: self.modifiers.with_slow(),
            ..self
        }
    }

    pub fn options(self, options: NodeOptions) -> Self {
        Self {
            options: Some(options),
            ..self
        }
    }

    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    pub fn describe<N, F, R>(self, names: N, body: F) -> Result<BlockId, CollectError>
    where
        N: Names,
        F: FnOnce(&mut Context) -> R,
        R: DescribeReturn,
    {
        let Chain {
            cx,
            modifiers,
            options,
        } = self;
        let block = cx.open(names, options, body)?;
        modifiers.apply(&mut cx.tree, block.into());
        Ok(block)
    }

    pub fn context<N, F, R>(self, names: N, body: F) -> Result<BlockId, CollectError>
    where
        N: Names,
        F: FnOnce(&mut Context) -> R,
        R: DescribeReturn,
    {
        self.describe(names, body)
    }

    #[track_caller]
    pub fn it<M>(
        self,
        description: impl Into<String>,
        callback: impl IntoCallback<TestContext, M>,
    ) -> TestHandle<'c> {
        let Chain {
            cx,
            modifiers,
            options,
        } = self;
        let id = cx.add_test(description.into(), callback, options);
        modifiers.apply(&mut cx.tree, id.into());
        TestHandle {
            tree: &mut cx.tree,
            id,
        }
    }

    #[track_caller]
    pub fn specify<M>(
        self,
        description: impl Into<String>,
        callback: impl IntoCallback<TestContext, M>,
    ) -> TestHandle<'c> {
        self.it(description, callback)
    }
}

/// A freshly collected test.
pub struct TestHandle<'c> {
    tree: &'c mut Tree,
    id: TestId,
}

impl TestHandle<'_> {
    pub fn id(&self) -> TestId {
        self.id
    }

    pub fn skip(self) -> Self {
        self.tree.skip(self.id.into());
        self
    }

    pub fn only(self) -> Self {
        self.tree.only(self.id.into());
        self
    }

    pub fn todo(self) -> Self {
        self.tree.todo(self.id.into());
        self
    }

    pub fn slow(self) -> Self {
        self.tree.test_mut(self.id).slow = true;
        self
    }

    pub fn timeout(self, ms: u64) -> Self {
        self.tree.set_timeout(self.id.into(), ms);
        self
    }

    fn local_hook<M>(
        self,
        kind: HookKind,
        description: String,
        callback: impl IntoCallback<HookContext, M>,
    ) -> Self {
        let block = self.tree.test(self.id).block;
        let hook = Hook::new(kind, description, callback.into_callback(), block);
        self.tree.add_local_hook(self.id, hook);
        self
    }

    pub fn before<M>(self, callback: impl IntoCallback<HookContext, M>) -> Self {
        self.local_hook(HookKind::BeforeTest, String::new(), callback)
    }

    pub fn before_named<M>(
        self,
        description: impl Into<String>,
        callback: impl IntoCallback<HookContext, M>,
    ) -> Self {
        self.local_hook(HookKind::BeforeTest, description.into(), callback)
    }

    pub fn after<M>(self, callback: impl IntoCallback<HookContext, M>) -> Self {
        self.local_hook(HookKind::AfterTest, String::new(), callback)
    }

    pub fn after_named<M>(
        self,
        description: impl Into<String>,
        callback: impl IntoCallback<HookContext, M>,
    ) -> Self {
        self.local_hook(HookKind::AfterTest, description.into(), callback)
    }

    /// Options evaluated when the run is resolved.
    pub fn options(self, options: NodeOptions) -> Self {
        self.tree.test_mut(self.id).options = Some(options);
        self
    }
}

/// The block a describe body is collected into.
pub struct BlockHandle<'c> {
    tree: &'c mut Tree,
    id: BlockId,
}

impl BlockHandle<'_> {
    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn skip(self) -> Self {
        self.tree.skip(self.id.into());
        self
    }

    pub fn timeout(self, ms: u64) -> Self {
        self.tree.set_timeout(self.id.into(), ms);
        self
    }
}
