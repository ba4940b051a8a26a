use crate::{event::Event, reporter::Reporter};

/// A reporter that discards every event.
///
/// Useful when only the counts of the [`RunReport`](crate::RunReport) matter,
/// or when the events are consumed through [`Run::events`](crate::Run::events)
/// instead.
#[derive(Debug, Default, Clone)]
pub struct NoReporter;

impl Reporter for NoReporter {
    type Error = ();

    fn report(&mut self, _: &Event) -> Result<(), Self::Error> {
        Ok(())
    }
}
