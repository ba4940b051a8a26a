use futures::FutureExt;
use kispec::prelude::*;
use pretty_assertions::assert_eq;

fn boom(message: &'static str) {
    panic!("{message}")
}

// Panics outside a sink scope go to whatever run is registered process-wide,
// this binary keeps a single run in flight.
#[tokio::test]
async fn panics_in_spawned_work_are_not_lost() {
    let mut cx = Engine::default().context();
    cx.skip_if(|| {
        async {
            let _ = std::thread::spawn(|| boom("setup boom")).join();
            false
        }
        .boxed()
    });
    cx.it("thread", |_: TestContext| {
        let _ = std::thread::spawn(|| boom("thread boom")).join();
    });
    cx.it("task", |_: TestContext| {
        async {
            let _ = tokio::spawn(async { boom("task boom") }).await;
        }
        .boxed()
    });
    cx.it("clean", |_: TestContext| ());

    let events = cx.start().wait().await;

    let messages: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            Event::EndTest { meta, .. } => Some(meta.err.as_ref().map(ToString::to_string)),
            _ => None,
        })
        .collect();
    assert_eq!(
        messages,
        [Some("thread boom".into()), Some("task boom".into()), None]
    );

    let errors: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            Event::Error { err } => Some(err.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(errors, [GlobalError::Uncaught("setup boom".into())]);
    assert_eq!(events.last(), Some(&Event::Done));
}
