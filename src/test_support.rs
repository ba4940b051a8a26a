use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::{FutureExt, future::BoxFuture};

use crate::{
    callback::Callback,
    context::Context,
    event::Event,
    unit::{HookContext, TestContext},
};

pub fn context() -> Context {
    Context::new(Arc::default())
}

/// Records which callbacks were called, in order.
#[derive(Debug, Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    pub fn push(&self, name: impl Into<String>) {
        self.0.lock().unwrap().push(name.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn test(&self, name: &str) -> Callback<TestContext> {
        let (rec, name) = (self.clone(), name.to_string());
        Callback::new(move |_| rec.push(&name))
    }

    pub fn failing_test(&self, name: &str) -> Callback<TestContext> {
        let (rec, name) = (self.clone(), name.to_string());
        Callback::new(move |_| {
            rec.push(&name);
            Err::<(), _>(format!("{name} failed"))
        })
    }

    pub fn sleeping_test(&self, name: &str, duration: Duration) -> Callback<TestContext> {
        let (rec, name) = (self.clone(), name.to_string());
        Callback::new(move |_| -> BoxFuture<'static, ()> {
            rec.push(&name);
            tokio::time::sleep(duration).boxed()
        })
    }

    pub fn hook(&self, name: &str) -> Callback<HookContext> {
        let (rec, name) = (self.clone(), name.to_string());
        Callback::new(move |_| rec.push(&name))
    }

    pub fn failing_hook(&self, name: &str) -> Callback<HookContext> {
        let (rec, name) = (self.clone(), name.to_string());
        Callback::new(move |_| {
            rec.push(&name);
            Err::<(), _>(format!("{name} failed"))
        })
    }
}

pub fn event_names(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(Event::name).collect()
}

/// Chains of all tests reported as skipped.
pub fn skipped_tests(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::SkipTest { test, .. } => Some(test.chain.clone()),
            _ => None,
        })
        .collect()
}
