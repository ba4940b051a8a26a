use std::{
    panic,
    time::{Duration, Instant},
};

use crossbeam_channel::Receiver;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    context::Context,
    event::{Emitter, Event, GlobalError},
    executor::Executor,
    reporter::{Reporter, ReporterErrors},
    sink::{self, SinkScope},
};

/// Stops a run at the next loop boundary.
///
/// The hook or test in flight still settles and cleanup hooks still run.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(CancellationToken);

impl StopHandle {
    pub fn stop(&self) {
        tracing::debug!("stop requested");
        self.0.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.0.is_cancelled()
    }

    pub async fn stopped(&self) {
        self.0.cancelled().await
    }
}

/// A started run.
///
/// Dropping the handle does not stop the run, events are then discarded.
#[derive(Debug)]
pub struct Run {
    events: Receiver<Event>,
    stop: StopHandle,
    task: JoinHandle<()>,
}

impl Run {
    pub(crate) fn spawn(context: Context) -> Self {
        let (tree, gate, config, stop) = context.into_parts();
        let (tx, events) = crossbeam_channel::unbounded();
        let (uncaught_tx, uncaught_rx) = sink::channel();

        let executor = Executor::new(tree, config, Emitter::new(tx, uncaught_rx), stop.clone());
        let task = tokio::spawn(async move {
            let _registration = sink::register(uncaught_tx.clone());
            SinkScope::new(executor.drive(gate).boxed(), uncaught_tx).await
        });
        tracing::debug!("run started");

        Self { events, stop, task }
    }

    /// The event stream, closed once `done` was sent.
    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to finish and collect every event not yet received.
    pub async fn wait(self) -> Vec<Event> {
        let joined = self.task.await;
        let mut events: Vec<_> = self.events.try_iter().collect();
        if let Err(err) = joined {
            if err.is_panic() {
                panic::resume_unwind(err.into_panic());
            }
            if events.last() != Some(&Event::Done) {
                events.extend(aborted(err.to_string()));
            }
        }
        events
    }

    /// Feed every event to `reporter` on a blocking thread.
    ///
    /// Reporter errors never affect the run, each is collected and reported back
    /// to the reporter as an `error` event.
    pub async fn report<R>(self, reporter: R) -> RunReport<R>
    where
        R: Reporter + Send + 'static,
        R::Error: Send,
    {
        let now = Instant::now();
        let Run { events, task, .. } = self;

        let reporting = tokio::task::spawn_blocking(move || {
            let mut reporter = reporter;
            let mut tally = Tally::default();
            let mut reporter_errors = Vec::new();
            while let Ok(event) = events.recv() {
                tally.record(&event);
                deliver(&mut reporter, &mut tally, &mut reporter_errors, event);
            }
            (reporter, tally, reporter_errors)
        });

        let joined = task.await;
        let (mut reporter, mut tally, mut reporter_errors) = match reporting.await {
            Ok(parts) => parts,
            Err(err) => panic::resume_unwind(err.into_panic()),
        };
        if let Err(err) = joined {
            if err.is_panic() {
                panic::resume_unwind(err.into_panic());
            }
            if !tally.done {
                for event in aborted(err.to_string()) {
                    tally.record(&event);
                    deliver(&mut reporter, &mut tally, &mut reporter_errors, event);
                }
            }
        }

        RunReport {
            reporter,
            failed: tally.failed,
            errors: tally.errors,
            duration: now.elapsed(),
            reporter_errors,
        }
    }
}

fn aborted(message: String) -> [Event; 2] {
    tracing::error!(%message, "run task ended without finishing");
    [
        Event::Error {
            err: GlobalError::Aborted(message),
        },
        Event::Done,
    ]
}

fn deliver<R: Reporter>(
    reporter: &mut R,
    tally: &mut Tally,
    reporter_errors: &mut Vec<(&'static str, R::Error)>,
    event: Event,
) {
    let Err(err) = reporter.report(&event) else {
        return;
    };
    tracing::warn!(event = event.name(), ?err, "reporter failed");
    let failure = Event::Error {
        err: GlobalError::Reporter {
            event: event.name(),
            message: format!("{err:?}"),
        },
    };
    reporter_errors.push((event.name(), err));
    tally.record(&failure);
    // failures on the failure report are only collected
    reporter_errors.push_on_error(failure.name(), reporter.report(&failure));
}

#[derive(Debug, Default)]
struct Tally {
    failed: usize,
    errors: usize,
    done: bool,
}

impl Tally {
    fn record(&mut self, event: &Event) {
        match event {
            Event::EndTest { meta, .. } if meta.failed() => self.failed += 1,
            Event::Error { .. } => self.errors += 1,
            Event::Done => self.done = true,
            _ => {}
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub struct RunReport<R: Reporter> {
    pub reporter: R,
    /// Number of failed tests.
    pub failed: usize,
    /// Number of `error` events, including reporter failures.
    pub errors: usize,
    pub duration: Duration,
    pub reporter_errors: Vec<(&'static str, R::Error)>,
}

impl<R: Reporter> RunReport<R> {
    pub fn success(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }

    /// `0` on success, `1` otherwise.
    pub fn exit_code(&self) -> i32 {
        match self.success() {
            true => 0,
            false => 1,
        }
    }
}
