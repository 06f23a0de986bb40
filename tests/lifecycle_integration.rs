//! End-to-end lifecycle tests for bound tasks.
//!
//! Each test submits tasks from the test thread to a dedicated executor
//! thread over an `mpsc` channel, then reads outcomes from the test thread
//! and from additional reader threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rstest::rstest;
use serde_json::{json, Value};

use bound_task::{
    Arg, BoundTask, CallArgs, Callback, OutcomeKind, Target, TaskError, TaskException,
};

/// An owner thread that runs every task it receives.
struct Executor {
    tx: Option<mpsc::Sender<Arc<BoundTask>>>,
    handle: Option<JoinHandle<()>>,
}

impl Executor {
    fn spawn() -> Self {
        let (tx, rx) = mpsc::channel::<Arc<BoundTask>>();
        let handle = thread::Builder::new()
            .name("bound-task-executor".to_string())
            .spawn(move || {
                for task in rx {
                    task.run().expect("owner thread run");
                }
            })
            .expect("spawn executor");
        Self {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    fn id(&self) -> thread::ThreadId {
        self.handle.as_ref().expect("executor running").thread().id()
    }

    fn submit(&self, task: &Arc<BoundTask>) {
        self.tx
            .as_ref()
            .expect("executor running")
            .send(Arc::clone(task))
            .expect("executor alive");
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn increment() -> Target {
    Target::new(|args| {
        let x: i64 = args.typed(0)?;
        Ok(json!(x + 1))
    })
}

fn value_error() -> Target {
    Target::new(|_| Err(TaskException::new("ValueError", "bad input")))
}

mod success {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn increment_round_trip() {
        let executor = Executor::spawn();
        let task = Arc::new(
            BoundTask::from_call(executor.id(), increment(), CallArgs::new().arg(json!(41)))
                .unwrap(),
        );

        executor.submit(&task);
        task.wait();

        assert!(task.is_successful().unwrap());
        assert_eq!(task.get_result().unwrap(), Some(json!(42)));
        assert!(task.get_exception().unwrap().is_none());
        assert_eq!(task.outcome_kind(), OutcomeKind::Success);
    }

    #[test]
    fn structured_values_survive_text_encoding() {
        let executor = Executor::spawn();
        let echo = Target::new(|args| {
            Ok(json!({ "args": args.data(0), "mode": args.kwarg_data("mode") }))
        });
        let input = json!({"nested": [1, 2.5, "three", null, true], "empty": {}});
        let call = CallArgs::new().arg(input.clone()).kwarg("mode", json!("fast"));
        let task = Arc::new(BoundTask::from_call(executor.id(), echo, call).unwrap());

        executor.submit(&task);
        task.wait();

        assert_eq!(
            task.get_result().unwrap(),
            Some(json!({"args": input, "mode": "fast"}))
        );
    }

    #[test]
    fn info_reports_completion() {
        let executor = Executor::spawn();
        let task = Arc::new(
            BoundTask::from_call(executor.id(), increment(), CallArgs::new().arg(json!(0)))
                .unwrap(),
        );
        executor.submit(&task);
        task.wait();

        let info = task.info();
        assert_eq!(info.task_id, task.id());
        assert_eq!(info.status, OutcomeKind::Success);
        let completed_at = info.completed_at.expect("completed_at set");
        assert!(completed_at >= info.created_at);
    }
}

mod failure {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn value_error_round_trip() {
        let executor = Executor::spawn();
        let task =
            Arc::new(BoundTask::from_call(executor.id(), value_error(), CallArgs::new()).unwrap());

        executor.submit(&task);
        task.wait();

        assert!(!task.is_successful().unwrap());
        assert_eq!(task.get_result().unwrap(), None);

        let exc = task.get_exception().unwrap().expect("exception present");
        assert_eq!(exc.type_name(), "ValueError");
        assert_eq!(exc.message(), "bad input");
        assert!(!exc.trace().is_empty());
        assert_eq!(exc.thread(), Some("bound-task-executor"));
    }

    #[test]
    fn trace_is_rooted_at_failure_not_reader() {
        let executor = Executor::spawn();
        let task =
            Arc::new(BoundTask::from_call(executor.id(), value_error(), CallArgs::new()).unwrap());
        executor.submit(&task);
        task.wait();

        let first = task.get_exception().unwrap().unwrap();
        let second = task.get_exception().unwrap().unwrap();
        assert_eq!(first.trace(), second.trace());
    }

    #[inline(never)]
    fn reject_input(value: &Value) -> Result<Value, TaskException> {
        Err(TaskException::new("ValueError", format!("rejected {value}")))
    }

    #[inline(never)]
    fn explode_on_input(value: &Value) -> Value {
        panic!("exploded on {value}")
    }

    #[test]
    fn error_trace_names_the_failing_function() {
        let executor = Executor::spawn();
        let target = Target::new(|args| reject_input(args.data(0).unwrap_or(&Value::Null)));
        let task = Arc::new(
            BoundTask::from_call(executor.id(), target, CallArgs::new().arg(json!(3))).unwrap(),
        );
        executor.submit(&task);
        task.wait();

        let exc = thread::spawn({
            let task = Arc::clone(&task);
            move || task.get_exception().unwrap().unwrap()
        })
        .join()
        .unwrap();
        assert_eq!(exc.message(), "rejected 3");
        assert!(exc.trace().contains("reject_input"), "trace: {}", exc.trace());
        assert!(!exc.trace().contains("get_exception"));
    }

    #[test]
    fn panic_trace_names_the_panicking_function() {
        let executor = Executor::spawn();
        let target =
            Target::new(|args| Ok(explode_on_input(args.data(0).unwrap_or(&Value::Null))));
        let task = Arc::new(
            BoundTask::from_call(executor.id(), target, CallArgs::new().arg(json!("x"))).unwrap(),
        );
        executor.submit(&task);
        task.wait();

        let exc = task.get_exception().unwrap().unwrap();
        assert!(exc.is("panic"));
        assert_eq!(exc.message(), "exploded on \"x\"");
        assert!(exc.trace().contains("explode_on_input"), "trace: {}", exc.trace());
    }

    #[test]
    fn panic_is_captured() {
        let executor = Executor::spawn();
        let target = Target::new(|_| panic!("target blew up"));
        let task = Arc::new(BoundTask::from_call(executor.id(), target, CallArgs::new()).unwrap());

        executor.submit(&task);
        task.wait();

        let exc = task.get_exception().unwrap().unwrap();
        assert!(exc.is("panic"));
        assert_eq!(exc.message(), "target blew up");
        assert!(!exc.trace().is_empty());
    }

    #[test]
    fn wrapped_std_error_keeps_type_name() {
        let executor = Executor::spawn();
        let target = Target::new(|args| {
            let text: String = args.typed(0)?;
            let n: i64 = text.parse().map_err(|e| TaskException::from_error(&e))?;
            Ok(json!(n))
        });
        let task = Arc::new(
            BoundTask::from_call(executor.id(), target, CallArgs::new().arg(json!("x1"))).unwrap(),
        );
        executor.submit(&task);
        task.wait();

        let exc = task.get_exception().unwrap().unwrap();
        assert_eq!(exc.type_name(), "ParseIntError");
    }

    #[test]
    fn envelope_crosses_process_boundary_as_base64() {
        let executor = Executor::spawn();
        let task =
            Arc::new(BoundTask::from_call(executor.id(), value_error(), CallArgs::new()).unwrap());
        executor.submit(&task);
        task.wait();

        let wire = task.exception_envelope().unwrap().unwrap().to_base64();
        let restored = bound_task::ExceptionEnvelope::from_base64(&wire)
            .unwrap()
            .open()
            .unwrap();
        assert_eq!(restored, task.get_exception().unwrap().unwrap());
    }
}

mod usage_errors {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn second_run_is_rejected_and_outcome_unchanged() {
        let task =
            BoundTask::on_current_thread(increment(), CallArgs::new().arg(json!(1))).unwrap();
        task.run().unwrap();
        let before = task.result_text().unwrap().map(str::to_string);

        let err = task.run().unwrap_err();
        assert!(matches!(err, TaskError::AlreadyRun { .. }));
        assert_eq!(task.result_text().unwrap().map(str::to_string), before);
        assert_eq!(task.outcome_kind(), OutcomeKind::Success);
    }

    #[test]
    fn second_run_from_other_thread_is_rejected() {
        let task = Arc::new(BoundTask::on_current_thread(value_error(), CallArgs::new()).unwrap());
        task.run().unwrap();
        let envelope_before = task.exception_envelope().unwrap().cloned();

        let other = Arc::clone(&task);
        let err = thread::spawn(move || other.run()).join().unwrap().unwrap_err();
        assert!(matches!(err, TaskError::AlreadyRun { .. }));
        assert_eq!(task.exception_envelope().unwrap().cloned(), envelope_before);
    }

    #[test]
    fn wrong_thread_is_rejected_and_signal_stays_unset() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let target = Target::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        });
        let task = Arc::new(BoundTask::on_current_thread(target, CallArgs::new()).unwrap());

        let other = Arc::clone(&task);
        let err = thread::spawn(move || other.run()).join().unwrap().unwrap_err();
        assert!(matches!(err, TaskError::WrongThread { .. }));
        assert!(!task.is_complete());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // The owner can still run it afterwards.
        task.run().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    #[case::is_successful("is_successful")]
    #[case::get_result("get_result")]
    #[case::get_exception("get_exception")]
    #[case::result_text("result_text")]
    fn queries_before_completion_fail(#[case] query: &str) {
        let task =
            BoundTask::on_current_thread(increment(), CallArgs::new().arg(json!(1))).unwrap();
        let err = match query {
            "is_successful" => task.is_successful().map(|_| ()),
            "get_result" => task.get_result().map(|_| ()),
            "get_exception" => task.get_exception().map(|_| ()),
            "result_text" => task.result_text().map(|_| ()),
            other => panic!("unknown query {other}"),
        }
        .unwrap_err();
        assert!(matches!(err, TaskError::NotCompleted { .. }));
    }
}

mod partitioning {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn callback_identity_survives_partitioning() {
        let executor = Executor::spawn();
        let callback = Callback::new(|args| Ok(json!(args.len())));
        let expected = callback.clone();

        let target = Target::new(move |args| {
            let received = args
                .callback(0)
                .ok_or_else(|| TaskException::new("TypeError", "expected callback"))?;
            Ok(json!({
                "same_callback": received.ptr_eq(&expected),
                "value": args.data(1),
            }))
        });
        let call = CallArgs::new().arg(callback).arg(json!(7));
        let task = Arc::new(BoundTask::from_call(executor.id(), target, call).unwrap());

        assert!(!task.payload_text().contains("Callback"));
        executor.submit(&task);
        task.wait();

        assert_eq!(
            task.get_result().unwrap(),
            Some(json!({"same_callback": true, "value": 7}))
        );
    }

    #[test]
    fn keyword_callbacks_are_invoked() {
        let executor = Executor::spawn();
        let target = Target::new(|args| {
            let on_item = args
                .kwarg_callback("on_item")
                .ok_or_else(|| TaskException::new("TypeError", "expected on_item"))?;
            let items: Vec<i64> = args.typed(0)?;
            let mapped = items
                .into_iter()
                .map(|i| on_item.call(vec![json!(i)]))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(mapped))
        });
        let call = CallArgs::new()
            .arg(json!([1, 2, 3]))
            .kwarg(
                "on_item",
                Arg::callback(|args| Ok(json!(args[0].as_i64().unwrap_or(0) * 10))),
            );
        let task = Arc::new(BoundTask::from_call(executor.id(), target, call).unwrap());

        executor.submit(&task);
        task.wait();
        assert_eq!(task.get_result().unwrap(), Some(json!([10, 20, 30])));
    }

    #[test]
    fn callback_failure_becomes_task_failure() {
        let executor = Executor::spawn();
        let target = Target::new(|args| {
            let cb = args
                .callback(0)
                .ok_or_else(|| TaskException::new("TypeError", "expected callback"))?;
            cb.call(Vec::new())
        });
        let call = CallArgs::new().arg(Arg::callback(|_| {
            Err(TaskException::new("LookupError", "no such key"))
        }));
        let task = Arc::new(BoundTask::from_call(executor.id(), target, call).unwrap());

        executor.submit(&task);
        task.wait();
        let exc = task.get_exception().unwrap().unwrap();
        assert_eq!(exc.type_name(), "LookupError");
    }
}

mod readers {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn multiple_readers_observe_identical_outcome() {
        let executor = Executor::spawn();
        let task = Arc::new(
            BoundTask::from_call(executor.id(), increment(), CallArgs::new().arg(json!(41)))
                .unwrap(),
        );

        let readers: Vec<_> = (0..2)
            .map(|_| {
                let task = Arc::clone(&task);
                thread::spawn(move || {
                    task.wait();
                    (
                        task.is_successful().unwrap(),
                        task.get_result().unwrap(),
                        task.get_exception().unwrap(),
                    )
                })
            })
            .collect();

        executor.submit(&task);

        let observed: Vec<_> = readers.into_iter().map(|r| r.join().unwrap()).collect();
        assert_eq!(observed[0], observed[1]);
        assert_eq!(observed[0], (true, Some(json!(42)), None));
    }

    #[test]
    fn multiple_readers_observe_identical_failure() {
        let executor = Executor::spawn();
        let task =
            Arc::new(BoundTask::from_call(executor.id(), value_error(), CallArgs::new()).unwrap());
        executor.submit(&task);

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let task = Arc::clone(&task);
                thread::spawn(move || {
                    task.wait();
                    task.get_exception().unwrap()
                })
            })
            .collect();

        let observed: Vec<_> = readers.into_iter().map(|r| r.join().unwrap()).collect();
        assert!(observed.iter().all(|e| e == &observed[0]));
        assert!(observed[0].is_some());
    }

    #[test]
    fn timed_out_wait_does_not_abort_task() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(parking_lot::Mutex::new(release_rx));
        let executor = Executor::spawn();
        let gate = Arc::clone(&release_rx);
        let target = Target::new(move |_| {
            gate.lock()
                .recv()
                .map_err(|e| TaskException::from_error(&e))?;
            Ok(json!("done"))
        });
        let task = Arc::new(BoundTask::from_call(executor.id(), target, CallArgs::new()).unwrap());
        executor.submit(&task);

        assert!(!task.wait_timeout(Duration::from_millis(20)));
        assert!(matches!(
            task.get_result(),
            Err(TaskError::NotCompleted { .. })
        ));

        release_tx.send(()).unwrap();
        assert!(task.wait_timeout(Duration::from_secs(10)));
        assert_eq!(task.get_result().unwrap(), Some(json!("done")));
    }
}
