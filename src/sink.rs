//! The failure sink.
//!
//! While a unit is polled, the thread polling it has a current sink. Failures
//! reported through [`report_uncaught`] go to that sink and fail the unit, even if
//! its callback would otherwise still be pending. Failures reported while no unit
//! is in flight go to the run-level sink and surface as `error` events.
//!
//! Every run and every unit in flight also registers its sink process-wide. A
//! failure raised where no scope is active, for example in a thread or task
//! spawned by a test, goes to the most recent registration: the running unit if
//! there is one, the run otherwise.
//!
//! A panic hook is installed once. Panics inside a sink scope are caught by the
//! unit itself, the hook only records their location. Panics anywhere else are
//! sent to the registered sink and kept off stderr. With nothing registered they
//! are forwarded to the previously installed hook.

use std::{
    cell::{Cell, RefCell},
    fmt::Display,
    future::Future,
    panic::{self, PanicHookInfo},
    pin::Pin,
    sync::{Mutex, Once, PoisonError},
    task::{Context, Poll},
};

use tokio::sync::mpsc;

use crate::outcome::UnitError;

thread_local! {
    static CURRENT_SINK: RefCell<Option<FailureSender>> = const { RefCell::new(None) };
    static IN_SCOPE: Cell<bool> = const { Cell::new(false) };
    static LAST_PANIC: RefCell<Option<String>> = const { RefCell::new(None) };
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry::new());

/// Sending half of a failure sink.
#[derive(Debug, Clone)]
pub struct FailureSender(mpsc::UnboundedSender<UnitError>);

pub(crate) type FailureReceiver = mpsc::UnboundedReceiver<UnitError>;

pub(crate) fn channel() -> (FailureSender, FailureReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FailureSender(tx), rx)
}

impl FailureSender {
    /// Report a failure, returns `false` if nobody listens anymore.
    pub fn report(&self, err: impl Display) -> bool {
        self.send(UnitError::Uncaught(err.to_string()))
    }

    pub(crate) fn send(&self, err: UnitError) -> bool {
        self.0.send(err).is_ok()
    }
}

/// The sink of the unit currently polled on this thread.
pub fn current() -> Option<FailureSender> {
    CURRENT_SINK.with_borrow(|sink| sink.clone())
}

/// Report a failure to the current sink.
///
/// Off the polling thread the failure goes to the unit or run in flight.
/// Returns `false` if there is none.
pub fn report_uncaught(err: impl Display) -> bool {
    match current().or_else(in_flight) {
        Some(sink) => sink.report(err),
        None => {
            tracing::warn!(%err, "uncaught failure outside of any run");
            false
        }
    }
}

/// Makes `sink` the current sink during every poll of `inner`.
pub(crate) struct SinkScope<F> {
    inner: F,
    sink: FailureSender,
}

impl<F> SinkScope<F> {
    pub(crate) fn new(inner: F, sink: FailureSender) -> Self {
        install_panic_hook();
        Self { inner, sink }
    }
}

struct RestoreSink {
    previous: Option<FailureSender>,
    was_in_scope: bool,
}

impl Drop for RestoreSink {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_SINK.with_borrow_mut(|sink| *sink = previous);
        IN_SCOPE.set(self.was_in_scope);
    }
}

impl<F: Future + Unpin> Future for SinkScope<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let sink = self.sink.clone();
        let _restore = RestoreSink {
            previous: CURRENT_SINK.with_borrow_mut(|current| current.replace(sink)),
            was_in_scope: IN_SCOPE.replace(true),
        };
        Pin::new(&mut self.inner).poll(cx)
    }
}

/// Sinks of the runs and units in flight, in registration order.
#[derive(Debug)]
struct Registry {
    next: u64,
    sinks: Vec<(u64, FailureSender)>,
}

impl Registry {
    const fn new() -> Self {
        Self {
            next: 0,
            sinks: Vec::new(),
        }
    }

    fn push(&mut self, sink: FailureSender) -> u64 {
        let id = self.next;
        self.next += 1;
        self.sinks.push((id, sink));
        id
    }

    fn remove(&mut self, id: u64) {
        self.sinks.retain(|(other, _)| *other != id);
    }

    fn last(&self) -> Option<FailureSender> {
        self.sinks.last().map(|(_, sink)| sink.clone())
    }
}

/// Keeps a sink registered process-wide until dropped.
#[derive(Debug)]
pub(crate) struct Registration(u64);

/// Register `sink` as the target of failures raised outside any sink scope.
pub(crate) fn register(sink: FailureSender) -> Registration {
    let id = REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(sink);
    Registration(id)
}

impl Drop for Registration {
    fn drop(&mut self) {
        REGISTRY
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.0);
    }
}

fn in_flight() -> Option<FailureSender> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner).last()
}

/// Take the location of the last panic raised in a sink scope on this thread.
pub(crate) fn take_panic_location() -> Option<String> {
    LAST_PANIC.with_borrow_mut(Option::take)
}

fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
            let location = info
                .location()
                .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()));

            if IN_SCOPE.try_with(Cell::get).unwrap_or(false) {
                let _ = LAST_PANIC.try_with(|last| {
                    if let Ok(mut last) = last.try_borrow_mut() {
                        *last = location;
                    }
                });
                return;
            }

            let err = UnitError::Panicked {
                message: hook_message(info),
                location,
            };
            match in_flight() {
                Some(sink) if sink.send(err) => {}
                _ => previous(info),
            }
        }));
    });
}

fn hook_message(info: &PanicHookInfo<'_>) -> String {
    let payload = info.payload();
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("Box<dyn Any>"))
}
