use std::{
    io,
    sync::{Arc, Mutex},
};

use kispec::prelude::*;

/// Shared log of the callbacks that ran.
#[derive(Debug, Default, Clone)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn test(&self, entry: &str) -> Callback<TestContext> {
        let (log, entry) = (self.clone(), entry.to_string());
        Callback::new(move |_| log.push(&entry))
    }

    pub fn hook(&self, entry: &str) -> Callback<HookContext> {
        let (log, entry) = (self.clone(), entry.to_string());
        Callback::new(move |_| log.push(&entry))
    }

    pub fn throwing_hook(&self, entry: &str) -> Callback<HookContext> {
        let (log, entry) = (self.clone(), entry.to_string());
        Callback::new(move |_| {
            log.push(&entry);
            Err::<(), _>("thrown")
        })
    }
}

/// Descriptions of the tests in `events` matching `pick`.
pub fn tests_where(events: &[Event], pick: impl Fn(&Event) -> bool) -> Vec<String> {
    events
        .iter()
        .filter(|event| pick(event))
        .filter_map(|event| event.test().map(|test| test.description.clone()))
        .collect()
}

pub fn skipped(events: &[Event]) -> Vec<String> {
    tests_where(events, |event| matches!(event, Event::SkipTest { .. }))
}

pub fn started(events: &[Event]) -> Vec<String> {
    tests_where(events, |event| matches!(event, Event::StartTest { .. }))
}

/// A writer that can be read while a reporter owns a clone of it.
#[derive(Debug, Default, Clone)]
pub struct Buffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| io::Error::other("poison error"))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Buffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}
