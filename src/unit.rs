use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::FutureExt;
use tokio::{sync::watch, time::Instant};

use crate::{
    callback::Callback,
    outcome::{CallbackResult, MAX_TIMEOUT_MS, RunMeta, UnitError},
    sink::{self, SinkScope},
};

/// Runtime state shared between a running unit and its context.
#[derive(Debug)]
pub(crate) struct UnitState {
    skipped: AtomicBool,
    timeout_set: AtomicBool,
    timeout: watch::Sender<u64>,
}

impl UnitState {
    fn new(timeout: u64) -> Self {
        Self {
            skipped: AtomicBool::new(false),
            timeout_set: AtomicBool::new(false),
            timeout: watch::Sender::new(timeout.min(MAX_TIMEOUT_MS)),
        }
    }

    fn set_timeout(&self, ms: u64) {
        self.timeout_set.store(true, Ordering::SeqCst);
        self.timeout.send_replace(ms.min(MAX_TIMEOUT_MS));
    }

    fn current_timeout(&self) -> u64 {
        *self.timeout.borrow()
    }

    fn own_timeout(&self) -> Option<u64> {
        self.timeout_set
            .load(Ordering::SeqCst)
            .then(|| self.current_timeout())
    }
}

/// Passed to every test callback.
#[derive(Debug, Clone)]
pub struct TestContext(Arc<UnitState>);

impl TestContext {
    /// Skip the running test.
    ///
    /// The test still settles normally, it is reported as skipped afterwards.
    pub fn skip(&self) {
        self.0.skipped.store(true, Ordering::SeqCst);
    }

    pub fn is_skipped(&self) -> bool {
        self.0.skipped.load(Ordering::SeqCst)
    }

    /// Change the timeout of the running test, `0` disables it.
    ///
    /// The new timeout is measured from the start of the test.
    pub fn timeout(&self, ms: u64) {
        self.0.set_timeout(ms);
    }

    pub fn current_timeout(&self) -> u64 {
        self.0.current_timeout()
    }
}

/// Passed to every hook callback.
#[derive(Debug, Clone)]
pub struct HookContext(Arc<UnitState>);

impl HookContext {
    /// Change the timeout of the running hook, `0` disables it.
    ///
    /// The hook keeps this timeout for later runs.
    pub fn timeout(&self, ms: u64) {
        self.0.set_timeout(ms);
    }

    pub fn current_timeout(&self) -> u64 {
        self.0.current_timeout()
    }
}

pub(crate) trait UnitContext: Send + 'static {
    fn from_state(state: Arc<UnitState>) -> Self;
}

impl UnitContext for TestContext {
    fn from_state(state: Arc<UnitState>) -> Self {
        Self(state)
    }
}

impl UnitContext for HookContext {
    fn from_state(state: Arc<UnitState>) -> Self {
        Self(state)
    }
}

#[derive(Debug)]
pub(crate) struct UnitRun {
    pub meta: RunMeta,
    pub skipped: bool,
    pub own_timeout: Option<u64>,
}

/// Run a single hook or test body.
///
/// The unit settles on whatever comes first: the callback's own result, a panic,
/// a failure reported to the failure sink or the timeout. A unit that took at
/// least as long as its timeout fails with a timeout even if it settled, this
/// catches callbacks that block the thread.
pub(crate) async fn run_unit<Cx: UnitContext>(callback: &Callback<Cx>, timeout: u64) -> UnitRun {
    let state = Arc::new(UnitState::new(timeout));
    let (failure_tx, mut failures) = sink::channel();
    let mut timeouts = state.timeout.subscribe();

    let started = Instant::now();
    let settle = AssertUnwindSafe(callback.invoke(Cx::from_state(Arc::clone(&state))))
        .catch_unwind()
        .map(|res| match res {
            Ok(CallbackResult(res)) => res.err(),
            Err(payload) => Some(UnitError::Panicked {
                message: payload_as_string(payload),
                location: sink::take_panic_location(),
            }),
        })
        .boxed();
    let _registration = sink::register(failure_tx.clone());
    let mut settle = SinkScope::new(settle, failure_tx);

    let mut err = loop {
        let ms = *timeouts.borrow_and_update();
        tokio::select! {
            biased;
            err = &mut settle => break err,
            Some(err) = failures.recv() => break Some(err),
            _ = expire(started, ms) => break Some(UnitError::timeout(ms, None)),
            Ok(()) = timeouts.changed() => continue,
        }
    };
    // failures reported just before the callback settled still count
    if err.is_none() {
        err = failures.try_recv().ok();
    }

    let elapsed = started.elapsed();
    let ms = state.current_timeout();
    if ms > 0 && elapsed >= Duration::from_millis(ms) {
        err = Some(UnitError::timeout(ms, err));
    }

    tracing::trace!(?elapsed, failed = err.is_some(), "unit settled");
    UnitRun {
        meta: RunMeta { err, elapsed },
        skipped: state.skipped.load(Ordering::SeqCst),
        own_timeout: state.own_timeout(),
    }
}

async fn expire(started: Instant, ms: u64) {
    match ms {
        0 => std::future::pending().await,
        ms => tokio::time::sleep_until(started + Duration::from_millis(ms)).await,
    }
}

/// Convert a panic payload into a string.
///
/// This matches the common payload types produced by `panic!` (`&'static str` and `String`).
pub(crate) fn payload_as_string(err: Box<dyn Any + Send + 'static>) -> String {
    err.downcast::<&'static str>()
        .map(|s| s.to_string())
        .or_else(|err| err.downcast::<String>().map(|s| *s))
        .unwrap_or_else(|_| String::from("Box<dyn Any>"))
}
