use std::io;

use crate::{
    event::Event,
    outcome::UnitError,
    reporter::Reporter,
};

/// A failed test, as listed by the [`SummaryReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub chain: String,
    pub err: UnitError,
}

/// Counts outcomes and writes a summary once the run is done.
#[derive(Debug)]
pub struct SummaryReporter<W: io::Write> {
    target: W,
    pub passed: usize,
    pub failed: usize,
    /// Skipped tests that are neither todo nor cancelled.
    pub pending: usize,
    pub todo: usize,
    pub cancelled: usize,
    pub failures: Vec<Failure>,
    pub errors: Vec<String>,
}

impl Default for SummaryReporter<io::Stdout> {
    fn default() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: io::Write> SummaryReporter<W> {
    pub fn new(target: W) -> Self {
        Self {
            target,
            passed: 0,
            failed: 0,
            pending: 0,
            todo: 0,
            cancelled: 0,
            failures: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn with_target<WithTarget: io::Write>(self, target: WithTarget) -> SummaryReporter<WithTarget> {
        SummaryReporter {
            target,
            passed: self.passed,
            failed: self.failed,
            pending: self.pending,
            todo: self.todo,
            cancelled: self.cancelled,
            failures: self.failures,
            errors: self.errors,
        }
    }

    pub fn target(&self) -> &W {
        &self.target
    }

    pub fn into_target(self) -> W {
        self.target
    }

    fn write_summary(&mut self) -> io::Result<()> {
        let w = &mut self.target;
        writeln!(w)?;
        writeln!(w, "  {} passing", self.passed)?;
        for (count, label) in [
            (self.pending, "pending"),
            (self.todo, "todo"),
            (self.cancelled, "cancelled"),
            (self.failed, "failing"),
        ] {
            if count > 0 {
                writeln!(w, "  {count} {label}")?;
            }
        }

        for (idx, failure) in self.failures.iter().enumerate() {
            writeln!(w)?;
            writeln!(w, "  {}) {}", idx + 1, failure.chain)?;
            writeln!(w, "     {}", failure.err)?;
            if let Some(original) = failure.err.original() {
                writeln!(w, "     caused by: {original}")?;
            }
        }

        if !self.errors.is_empty() {
            writeln!(w)?;
            writeln!(w, "  {} errors", self.errors.len())?;
            for err in &self.errors {
                writeln!(w, "     {err}")?;
            }
        }
        w.flush()
    }
}

impl<W: io::Write> Reporter for SummaryReporter<W> {
    type Error = io::Error;

    fn report(&mut self, event: &Event) -> Result<(), Self::Error> {
        match event {
            Event::EndTest { test, meta, .. } => match &meta.err {
                Some(err) => {
                    self.failed += 1;
                    self.failures.push(Failure {
                        chain: test.chain.clone(),
                        err: err.clone(),
                    });
                }
                None if meta.skipped => {}
                None => self.passed += 1,
            },
            Event::SkipTest { test, .. } if test.todo => self.todo += 1,
            Event::SkipTest { test, .. } if test.cancellation.is_some() => self.cancelled += 1,
            Event::SkipTest { .. } => self.pending += 1,
            Event::Error { err } => self.errors.push(err.to_string()),
            Event::Done => return self.write_summary(),
            _ => {}
        }
        Ok(())
    }
}
