use std::time::Duration;

use futures::FutureExt;
use kispec::{prelude::*, sink, tree::Structure};
use pretty_assertions::assert_eq;

mod lib;
use lib::*;

#[tokio::test]
async fn tests_run_in_declaration_order() {
    let log = Log::default();
    let mut cx = Engine::default().context();
    cx.it("1", log.test("1"));
    cx.describe("nested", |cx| {
        cx.it("3", log.test("3"));
        cx.it("4", log.test("4"));
    })
    .unwrap();
    cx.it("2", log.test("2"));

    cx.start().wait().await;

    assert_eq!(log.entries(), ["1", "3", "4", "2"]);
}

#[tokio::test]
async fn before_and_after_fire_once_each_hooks_fire_per_test() {
    let log = Log::default();
    let mut cx = Engine::default().context();
    cx.describe("outer", |cx| {
        cx.before(log.hook("before"));
        cx.after(log.hook("after"));
        cx.before_each(log.hook("each"));
        cx.after_each(log.hook("after each"));
        cx.describe("a", |cx| {
            cx.it("a1", log.test("a1"));
        })
        .unwrap();
        cx.describe("b", |cx| {
            cx.it("b1", log.test("b1"));
        })
        .unwrap();
    })
    .unwrap();

    cx.start().wait().await;

    assert_eq!(
        log.entries(),
        [
            "before",
            "each",
            "a1",
            "after each",
            "each",
            "b1",
            "after each",
            "after"
        ]
    );
}

#[tokio::test]
async fn only_inside_skipped_parents_is_ignored() {
    let log = Log::default();
    let mut cx = Engine::default().context();
    cx.describe("/", |cx| {
        cx.it("test1", log.test("test1"));
        cx.skip()
            .describe("nested#1", |cx| {
                cx.only().it("test2", log.test("test2"));
                cx.describe("nested#2", |cx| {
                    cx.it("test3", log.test("test3"));
                })
                .unwrap();
                cx.it("test5", log.test("test5"));
                cx.only()
                    .describe("nested#1#1", |cx| {
                        cx.it("test6", log.test("test6"));
                    })
                    .unwrap();
            })
            .unwrap();
        cx.skip()
            .describe("a new one", |cx| {
                cx.only()
                    .describe("a nested one", |cx| {
                        cx.it("test7", log.test("test7"));
                        cx.it("test8", log.test("test8"));
                    })
                    .unwrap();
            })
            .unwrap();
        cx.describe("nested#3", |cx| {
            cx.it("test4", log.test("test4"));
        })
        .unwrap();
    })
    .unwrap();

    let events = cx.start().wait().await;

    assert_eq!(log.entries(), ["test1", "test4"]);
    assert_eq!(
        skipped(&events),
        ["test2", "test3", "test5", "test6", "test7", "test8"]
    );
}

#[tokio::test]
async fn only_marks_are_unioned() {
    let log = Log::default();
    let mut cx = Engine::default().context();
    cx.describe("A", |cx| {
        cx.only().it("x", log.test("x"));
    })
    .unwrap();
    cx.describe("B", |cx| {
        cx.it("y", log.test("y"));
        cx.describe("C", |cx| {
            cx.only().it("z", log.test("z"));
        })
        .unwrap();
    })
    .unwrap();

    let events = cx.start().wait().await;

    assert_eq!(log.entries(), ["x", "z"]);
    assert!(skipped(&events).is_empty());
}

#[tokio::test]
async fn failing_before_cancels_the_block_but_after_runs() {
    let log = Log::default();
    let mut cx = Engine::default().context();
    cx.describe("block", |cx| {
        cx.before(log.throwing_hook("before"));
        cx.it("test", log.test("test"));
        cx.after(log.hook("after"));
    })
    .unwrap();

    let events = cx.start().wait().await;

    assert_eq!(log.entries(), ["before", "after"]);
    let cancellation = events
        .iter()
        .find_map(|event| match event {
            Event::SkipTest { test, .. } => test.cancellation.clone(),
            _ => None,
        })
        .expect("test should be cancelled");
    assert_eq!(cancellation.kind, CancelKind::BeforeHook);
    assert_eq!(cancellation.kind.as_str(), "beforeHook");
    assert_eq!(cancellation.reason.to_string(), "thrown");
}

#[tokio::test(start_paused = true)]
async fn timeouts_come_from_the_closest_level() {
    let engine = Engine::new(Config::new().with_default_timeout(30));
    let mut cx = engine.context();
    let sleepy = || {
        Callback::new(|_: TestContext| tokio::time::sleep(Duration::from_millis(100)).boxed())
    };
    cx.it("engine", sleepy());
    cx.describe("block", |cx| {
        cx.this().timeout(20);
        cx.it("block", sleepy());
        cx.it("own", sleepy()).timeout(10);
    })
    .unwrap();

    let events = engine.start(cx).wait().await;

    let messages: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            Event::EndTest { meta, .. } => meta.err.as_ref().map(ToString::to_string),
            _ => None,
        })
        .collect();
    assert_eq!(
        messages,
        [
            "Timeout of 30ms exceeded",
            "Timeout of 20ms exceeded",
            "Timeout of 10ms exceeded"
        ]
    );
}

#[tokio::test]
#[cfg_attr(all(ci, target_os = "macos"), ignore = "timing is unreliable on macos runners")]
async fn blocking_tests_still_time_out() {
    let mut cx = Engine::default().context();
    cx.it("blocks", |_: TestContext| std::thread::sleep(Duration::from_millis(50)))
        .timeout(10);

    let events = cx.start().wait().await;

    let err = events
        .iter()
        .find_map(|event| match event {
            Event::EndTest { meta, .. } => meta.err.clone(),
            _ => None,
        })
        .expect("test should fail");
    assert!(err.is_timeout());
}

#[tokio::test]
async fn stop_lets_the_running_test_finish_and_hooks_complete() {
    let log = Log::default();
    let mut cx = Engine::default().context();
    let stop = cx.stop_handle();
    cx.describe("outer", |cx| {
        cx.before(log.hook("before"));
        cx.after(log.hook("after"));
        cx.after_each(log.hook("after each"));
        cx.it("first", {
            let log = log.clone();
            move |_: TestContext| {
                stop.stop();
                log.push("first");
            }
        });
        cx.it("second", log.test("second"));
        cx.describe("inner", |cx| {
            cx.it("third", log.test("third"));
        })
        .unwrap();
    })
    .unwrap();

    let events = cx.start().wait().await;

    assert_eq!(log.entries(), ["before", "first", "after each", "after"]);
    assert_eq!(started(&events), ["first"]);
    assert_eq!(events.last(), Some(&Event::Done));
}

#[tokio::test]
async fn root_skip_accepts_values_functions_and_futures() {
    async fn run(setup: impl FnOnce(&mut Context)) -> Vec<String> {
        let log = Log::default();
        let mut cx = Engine::default().context();
        setup(&mut cx);
        cx.it("t", log.test("t"));
        cx.start().wait().await;
        log.entries()
    }

    assert!(run(|cx| cx.skip_if(true)).await.is_empty());
    assert_eq!(run(|cx| cx.skip_if(|| false)).await, ["t"]);
    assert!(run(|cx| cx.skip_if(|| async { true }.boxed())).await.is_empty());
    assert_eq!(run(|cx| cx.skip_if(|| async { false }.boxed())).await, ["t"]);
}

#[test]
fn ids_follow_the_position_in_the_parent() {
    let mut cx = Engine::default().context();
    cx.it("first", |_| ());
    cx.describe("block", |cx| {
        cx.it("a", |_| ());
        cx.describe("nested", |cx| {
            cx.it("b", |_| ());
        })
        .unwrap();
    })
    .unwrap();

    let listing: String = cx.structure().iter().map(ToString::to_string).collect();
    assert_eq!(listing, "1 first\n2 block\n  2.1 a\n  2.2 nested\n    2.2.1 b\n");
    assert_eq!(
        cx.structure()[1],
        Structure::Block {
            key: "2 block".into(),
            children: vec![
                Structure::Test {
                    id: "2.1".into(),
                    description: "a".into()
                },
                Structure::Block {
                    key: "2.2 nested".into(),
                    children: vec![Structure::Test {
                        id: "2.2.1".into(),
                        description: "b".into()
                    }]
                }
            ]
        }
    );
}

#[tokio::test]
async fn done_callbacks_and_uncaught_failures() {
    let mut cx = Engine::default().context();
    cx.it(
        "done later",
        Callback::with_done(|_: TestContext, done: Done| {
            std::thread::spawn(move || done.ok());
        }),
    );
    cx.it(
        "fails from another thread",
        |_: TestContext| {
            let sink = sink::current().expect("inside a unit");
            std::thread::spawn(move || sink.report("background failure"));
            std::future::pending::<()>().boxed()
        },
    )
    .timeout(0);
    cx.it(
        "never calls done",
        Callback::with_done(|_: TestContext, done: Done| drop(done)),
    );

    let events = cx.start().wait().await;

    let errors: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            Event::EndTest { meta, .. } => Some(meta.err.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        errors,
        [
            None,
            Some(UnitError::Uncaught("background failure".into())),
            Some(UnitError::Dropped)
        ]
    );
}

#[tokio::test]
async fn summary_reporter_writes_once_done() {
    let log = Log::default();
    let mut cx = Engine::default().context();
    cx.describe("math", |cx| {
        cx.it("adds", log.test("adds"));
        cx.it("divides", |_: TestContext| Err::<(), _>("division by zero"));
        cx.todo().it("multiplies", log.test("multiplies"));
    })
    .unwrap();

    let output = Buffer::default();
    let report = cx
        .start()
        .report(SummaryReporter::new(output.clone()))
        .await;

    assert_eq!(report.exit_code(), 1);
    assert!(report.reporter_errors.is_empty());
    assert_eq!(
        output.contents(),
        "\n  1 passing\n  1 todo\n  1 failing\n\n  1) math : divides\n     division by zero\n"
    );
}

#[tokio::test]
async fn todo_survives_skipped_parents_and_modifier_order() {
    let mut cx = Engine::default().context();
    cx.skip()
        .describe("skipped", |cx| {
            cx.todo().it("later", |_: TestContext| ());
            cx.it("plain", |_: TestContext| ());
        })
        .unwrap();
    cx.it("a", |_: TestContext| ()).todo().skip();
    cx.it("b", |_: TestContext| ()).skip().todo();

    let events = cx.start().wait().await;

    let todo: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            Event::SkipTest { test, .. } => Some((test.description.clone(), test.todo)),
            _ => None,
        })
        .collect();
    assert_eq!(
        todo,
        [
            ("later".to_string(), true),
            ("plain".to_string(), false),
            ("a".to_string(), true),
            ("b".to_string(), true)
        ]
    );
}
