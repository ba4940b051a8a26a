//! Consumers of the event stream.
//!
//! A [`Reporter`] sees every [`Event`] of a run in order, on a thread of its own.
//! It cannot influence the run, a failing call is collected into the
//! [`RunReport`](crate::RunReport) and the reporter is told about it with an
//! `error` event.

use std::fmt::Debug;

use crate::event::Event;

mod no;
pub use no::NoReporter;

mod summary;
pub use summary::{Failure, SummaryReporter};

pub trait Reporter {
    type Error: Debug;

    fn report(&mut self, event: &Event) -> Result<(), Self::Error>;
}

impl<F, E> Reporter for F
where
    F: FnMut(&Event) -> Result<(), E>,
    E: Debug,
{
    type Error = E;

    fn report(&mut self, event: &Event) -> Result<(), Self::Error> {
        self(event)
    }
}

pub(crate) trait ReporterErrors<E> {
    fn push_on_error(&mut self, event: &'static str, result: Result<(), E>);
}

impl<E> ReporterErrors<E> for Vec<(&'static str, E)> {
    fn push_on_error(&mut self, event: &'static str, result: Result<(), E>) {
        if let Err(err) = result {
            self.push((event, err));
        }
    }
}
