use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use tracing::Instrument;

use crate::{
    config::Config,
    context::Gate,
    event::{BlockInfo, Emitter, Event, GlobalError, TestInfo},
    hook::{HookKind, HookSlot},
    outcome::{CancelKind, Cancellation, RunMeta, TestRunMeta, UnitError},
    resolver,
    run::StopHandle,
    sink,
    tree::{BlockId, NodeId, ROOT, TestId, Tree},
    unit::{self, run_unit},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExecMeta {
    pub failed: bool,
    pub hook_failed: bool,
}

/// Walks a resolved tree, one unit at a time.
pub(crate) struct Executor {
    tree: Tree,
    config: Arc<Config>,
    emitter: Emitter,
    stop: StopHandle,
}

impl Executor {
    pub(crate) fn new(tree: Tree, config: Arc<Config>, emitter: Emitter, stop: StopHandle) -> Self {
        Self {
            tree,
            config,
            emitter,
            stop,
        }
    }

    /// Settle the root gate, resolve the tree and execute it.
    ///
    /// Whatever happens, `done` is the last event emitted.
    pub(crate) async fn drive(mut self, gate: Option<Gate>) {
        let outcome = AssertUnwindSafe(self.resolve_and_execute(gate))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(meta)) => tracing::debug!(failed = meta.failed, "run finished"),
            Ok(Err(err)) => {
                tracing::warn!(%err, "could not resolve the tree");
                self.emit(Event::Error { err: err.into() });
            }
            Err(payload) => {
                let mut message = unit::payload_as_string(payload);
                if let Some(location) = sink::take_panic_location() {
                    message = format!("{message} at {location}");
                }
                tracing::error!(%message, "run aborted");
                self.emit(Event::Error {
                    err: GlobalError::Aborted(message),
                });
            }
        }
        self.emit(Event::Done);
    }

    async fn resolve_and_execute(
        &mut self,
        gate: Option<Gate>,
    ) -> Result<ExecMeta, crate::options::OptionError> {
        if let Some(gate) = gate {
            if gate.settle().await {
                tracing::debug!("root skipped by its gate");
                self.tree.skip(ROOT.into());
            }
        }
        resolver::resolve(&mut self.tree, &self.config).await?;
        Ok(self.execute(ROOT).await)
    }

    fn emit(&mut self, event: Event) {
        self.emitter.emit(event);
    }

    fn stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    fn skip_test(&mut self, block: BlockId, test: TestId, runtime: bool) {
        self.emit(Event::SkipTest {
            block: BlockInfo::snapshot(&self.tree, block),
            test: TestInfo::snapshot(&self.tree, test),
            runtime,
        });
    }

    fn cancellation(&self, slot: HookSlot, reason: UnitError, kind: CancelKind) -> Cancellation {
        let hook = self.tree.hook(slot).info();
        tracing::debug!(kind = kind.as_str(), hook = %hook.kind, %reason, "hook failed, cancelling");
        Cancellation { reason, hook, kind }
    }

    async fn run_hook(&mut self, block: BlockId, test: Option<TestId>, slot: HookSlot) -> RunMeta {
        let hook = self.tree.hook(slot);
        let info = hook.info();
        let callback = hook.callback.clone();
        let timeout = self
            .tree
            .hook_timeout(hook)
            .unwrap_or(self.config.default_hook_timeout);

        self.emit(Event::StartHook {
            block: BlockInfo::snapshot(&self.tree, block),
            test: test.map(|id| TestInfo::snapshot(&self.tree, id)),
            hook: info.clone(),
        });
        if let Some(hook) = self.tree.hook_mut(slot) {
            hook.fired = true;
        }

        let span = tracing::debug_span!(
            "hook",
            kind = %info.kind,
            local = info.kind.is_local(),
            description = %info.description
        );
        let run = run_unit(&callback, timeout).instrument(span).await;

        if let Some(hook) = self.tree.hook_mut(slot) {
            hook.failed = run.meta.err.clone();
            if let Some(ms) = run.own_timeout {
                hook.set_timeout(ms);
            }
        }
        self.emit(Event::EndHook {
            block: BlockInfo::snapshot(&self.tree, block),
            test: test.map(|id| TestInfo::snapshot(&self.tree, id)),
            hook: info,
            meta: run.meta.clone(),
        });
        run.meta
    }

    fn execute(&mut self, block: BlockId) -> BoxFuture<'_, ExecMeta> {
        async move {
            let is_root = block == ROOT;
            if !is_root {
                tracing::debug!(block = %self.tree.chain(block), "enter block");
                self.emit(Event::EnterBlock {
                    block: BlockInfo::snapshot(&self.tree, block),
                });
            }

            let mut meta = ExecMeta::default();
            let children = self.tree.block(block).children.clone();

            if children.iter().all(|child| self.tree.is_exclusive(*child)) {
                for child in children {
                    match child {
                        NodeId::Block(id) => {
                            self.execute(id).await;
                        }
                        NodeId::Test(id) => self.skip_test(block, id, false),
                    }
                }
            } else {
                let failure = self.run_before_hooks(block).await;
                meta.hook_failed = failure.is_some();

                for child in children {
                    if self.stopped() {
                        break;
                    }
                    if let Some(cancellation) = &failure {
                        self.tree.cancel(child, cancellation.clone());
                    }
                    match child {
                        NodeId::Test(id) if self.tree.is_test_exclusive(id) => {
                            self.skip_test(block, id, false)
                        }
                        NodeId::Test(id) => meta.failed |= self.execute_test(block, id).await,
                        NodeId::Block(id) => meta.failed |= self.execute(id).await.failed,
                    }
                }

                let after = self.tree.block(block).hooks.after.len();
                for idx in (0..after).rev() {
                    let slot = HookSlot::Block(block, HookKind::After, idx);
                    if self.tree.hook(slot).fired {
                        continue;
                    }
                    if self.run_hook(block, None, slot).await.err.is_some() {
                        meta.hook_failed = true;
                    }
                }
            }

            if !is_root {
                self.emit(Event::ExitBlock {
                    block: BlockInfo::snapshot(&self.tree, block),
                });
                tracing::debug!(
                    block = %self.tree.chain(block),
                    failed = meta.failed,
                    hook_failed = meta.hook_failed,
                    "exit block"
                );
            }
            meta
        }
        .boxed()
    }

    /// Run the not yet fired `before` hooks from the root down to `block`.
    ///
    /// A hook that already failed on an earlier block fails again without running.
    async fn run_before_hooks(&mut self, block: BlockId) -> Option<Cancellation> {
        for ancestor in self.tree.ancestry(block) {
            let count = self.tree.block(ancestor).hooks.before.len();
            for idx in 0..count {
                if self.stopped() {
                    return None;
                }
                let slot = HookSlot::Block(ancestor, HookKind::Before, idx);
                let hook = self.tree.hook(slot);
                if let Some(err) = hook.failed.clone() {
                    return Some(self.cancellation(slot, err, CancelKind::BeforeHook));
                }
                if hook.fired {
                    continue;
                }
                if let Some(err) = self.run_hook(block, None, slot).await.err {
                    return Some(self.cancellation(slot, err, CancelKind::BeforeHook));
                }
            }
        }
        None
    }

    /// Run a single test with all of its hooks, returns whether the test failed.
    async fn execute_test(&mut self, block: BlockId, test: TestId) -> bool {
        let mut fired = Vec::new();
        let mut failure = None;
        for ancestor in self.tree.ancestry(block) {
            if self.stopped() {
                break;
            }
            let count = self.tree.block(ancestor).hooks.before_each.len();
            for idx in 0..count {
                if self.stopped() {
                    break;
                }
                let slot = HookSlot::Block(ancestor, HookKind::BeforeEach, idx);
                if let Some(err) = self.run_hook(block, Some(test), slot).await.err {
                    failure = Some(self.cancellation(slot, err, CancelKind::BeforeEach));
                    break;
                }
            }
            fired.push(ancestor);
            if failure.is_some() {
                break;
            }
        }

        let mut failed = false;
        if !self.stopped() {
            match failure {
                Some(cancellation) => {
                    self.tree.cancel(test.into(), cancellation);
                    self.skip_test(block, test, false);
                }
                None => failed = self.run_test_section(block, test).await,
            }

            let count = self.tree.test(test).after.len();
            for idx in 0..count {
                let slot = HookSlot::Test(test, HookKind::AfterTest, idx);
                self.run_hook(block, Some(test), slot).await;
            }
        }

        for ancestor in fired.into_iter().rev() {
            let count = self.tree.block(ancestor).hooks.after_each.len();
            for idx in (0..count).rev() {
                let slot = HookSlot::Block(ancestor, HookKind::AfterEach, idx);
                self.run_hook(block, Some(test), slot).await;
            }
        }
        failed
    }

    /// Local before hooks and the test body.
    async fn run_test_section(&mut self, block: BlockId, test: TestId) -> bool {
        let mut failure = None;
        let count = self.tree.test(test).before.len();
        for idx in 0..count {
            if self.stopped() {
                break;
            }
            let slot = HookSlot::Test(test, HookKind::BeforeTest, idx);
            if let Some(err) = self.run_hook(block, Some(test), slot).await.err {
                failure = Some(self.cancellation(slot, err, CancelKind::BeforeTest));
                break;
            }
        }
        if self.stopped() {
            return false;
        }
        if let Some(cancellation) = failure {
            self.tree.cancel(test.into(), cancellation);
            self.skip_test(block, test, false);
            return false;
        }

        self.emit(Event::StartTest {
            block: BlockInfo::snapshot(&self.tree, block),
            test: TestInfo::snapshot(&self.tree, test),
        });
        let callback = self.tree.test(test).callback.clone();
        let timeout = self
            .tree
            .test_timeout(test)
            .unwrap_or(self.config.default_timeout);
        let span = tracing::debug_span!("test", test = %self.tree.test_chain(test));
        let run = run_unit(&callback, timeout).instrument(span).await;

        if run.skipped {
            self.tree.skip(test.into());
        }
        if let Some(ms) = run.own_timeout {
            self.tree.set_timeout(test.into(), ms);
        }
        let skipped = self.tree.is_test_exclusive(test);
        if skipped {
            self.skip_test(block, test, true);
        }

        let meta = TestRunMeta {
            err: run.meta.err,
            elapsed: run.meta.elapsed,
            skipped,
        };
        let failed = meta.failed();
        self.emit(Event::EndTest {
            block: BlockInfo::snapshot(&self.tree, block),
            test: TestInfo::snapshot(&self.tree, test),
            meta,
        });
        failed
    }
}
