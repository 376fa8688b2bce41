// tests/engine_scenarios.rs

//! End-to-end engine behaviour against the in-memory filesystem and the
//! scripted observer, so every event is deterministic.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tailor::fs::mock::MockFileSystem;
use tailor::observe::{ManualObserver, PathChange};
use tailor::{MessageType, Tailor};
use tailor_test_utils::{ConfigBuilder, Received, Recorder, init_tracing};

struct Harness {
    tailor: Arc<Tailor>,
    fs: MockFileSystem,
    observer: ManualObserver,
    recorder: Recorder,
}

fn harness() -> Harness {
    harness_with(ConfigBuilder::new())
}

fn harness_with(config: ConfigBuilder) -> Harness {
    init_tracing();
    let fs = MockFileSystem::new();
    let observer = ManualObserver::new();
    let recorder = Recorder::new();
    let tailor = Tailor::builder()
        .config(config.build())
        .filesystem(Arc::new(fs.clone()))
        .observer(Arc::new(observer.clone()))
        .on_new_lines(recorder.callback())
        .build()
        .unwrap();
    Harness {
        tailor: Arc::new(tailor),
        fs,
        observer,
        recorder,
    }
}

/// Wait until a unit has subscribed to `path` (directory children are
/// attached asynchronously).
fn wait_subscribed(observer: &ManualObserver, path: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while observer.subscriber_count(path) == 0 {
        assert!(Instant::now() < deadline, "nobody subscribed to {path}");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn backfill_then_partial_line_is_completed_later() {
    let h = harness();
    h.fs.add_file("/var/log/app.log", "a\nb\n");

    let id = h.tailor.watch("/var/log/app.log").unwrap();
    assert!(h.recorder.wait_for(id, 1));

    h.fs.append("/var/log/app.log", "c");
    h.observer.emit("/var/log/app.log", PathChange::Grew { len: 5 });
    h.fs.append("/var/log/app.log", "d\n");
    h.observer.emit("/var/log/app.log", PathChange::Grew { len: 7 });

    assert!(h.recorder.wait_for(id, 2));
    // Give a spurious extra delivery a chance to show up.
    thread::sleep(Duration::from_millis(50));
    assert_eq!(
        h.recorder.for_client(id),
        vec![Received::started(id, &["a", "b"]), Received::added(id, &["cd"])]
    );
}

#[test]
fn empty_file_receives_appends_as_they_complete() {
    let h = harness();
    h.fs.add_file("/f", "");
    let id = h.tailor.watch("/f").unwrap();
    assert!(h.recorder.wait_for(id, 1));

    h.fs.append("/f", "a\nb\n");
    h.observer.emit("/f", PathChange::Grew { len: 4 });
    assert!(h.recorder.wait_for(id, 2));

    h.fs.append("/f", "c");
    h.observer.emit("/f", PathChange::Grew { len: 5 });
    h.fs.append("/f", "d\n");
    h.observer.emit("/f", PathChange::Grew { len: 7 });
    assert!(h.recorder.wait_for(id, 3));

    assert_eq!(
        h.recorder.for_client(id),
        vec![
            Received::started(id, &[]),
            Received::added(id, &["a", "b"]),
            Received::added(id, &["cd"]),
        ]
    );
}

#[test]
fn truncation_restarts_from_offset_zero() {
    let h = harness();
    h.fs.add_file("/app.log", "one\ntwo\n");
    let id = h.tailor.watch("/app.log").unwrap();
    assert!(h.recorder.wait_for(id, 1));

    h.fs.truncate("/app.log", 0);
    h.fs.append("/app.log", "x\n");
    h.observer.emit("/app.log", PathChange::Replaced);

    assert!(h.recorder.wait_for(id, 3));
    assert_eq!(
        h.recorder.for_client(id)[1..],
        [Received::started(id, &[]), Received::added(id, &["x"])]
    );
}

#[test]
fn rename_rotation_follows_the_new_file() {
    let h = harness();
    h.fs.add_file("/app.log", "old\n");
    let id = h.tailor.watch("/app.log").unwrap();
    assert!(h.recorder.wait_for(id, 1));

    h.fs.replace("/app.log", "fresh start\nsecond\n");
    h.observer.emit("/app.log", PathChange::Replaced);

    assert!(h.recorder.wait_for(id, 3));
    assert_eq!(
        h.recorder.for_client(id),
        vec![
            Received::started(id, &["old"]),
            Received::started(id, &[]),
            Received::added(id, &["fresh start", "second"]),
        ]
    );
}

#[test]
fn removed_file_keeps_the_watch_until_it_returns() {
    let h = harness();
    h.fs.add_file("/app.log", "1\n");
    let id = h.tailor.watch("/app.log").unwrap();
    assert!(h.recorder.wait_for(id, 1));

    h.fs.remove("/app.log");
    h.observer.emit("/app.log", PathChange::Removed);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.tailor.active_clients(), vec![id]);
    assert_eq!(h.recorder.for_client(id).len(), 1);

    h.fs.add_file("/app.log", "2\n");
    h.observer.emit("/app.log", PathChange::Replaced);
    assert!(h.recorder.wait_for(id, 3));
    assert_eq!(h.recorder.added_lines(id), vec!["2".to_string()]);
}

#[test]
fn directory_watch_tails_existing_and_new_children_under_one_id() {
    let h = harness();
    h.fs.add_file("/logs/a.log", "first\n");
    h.fs.add_file("/logs/.hidden", "secret\n");
    h.fs.add_dir("/logs/archive");

    let id = h.tailor.watch("/logs").unwrap();
    assert!(h.recorder.wait_for(id, 1));
    assert_eq!(h.recorder.for_client(id), vec![Received::started(id, &["first"])]);
    assert_eq!(h.observer.subscriber_count("/logs/.hidden"), 0);

    h.fs.add_file("/logs/b.log", "b1\n");
    h.observer.emit(
        "/logs",
        PathChange::Created {
            path: "/logs/b.log".into(),
        },
    );
    assert!(h.recorder.wait_for(id, 3));
    assert_eq!(
        h.recorder.for_client(id)[1..],
        [Received::started(id, &[]), Received::added(id, &["b1"])]
    );

    // A second report for the same child does not start a second reader.
    h.observer.emit(
        "/logs",
        PathChange::Created {
            path: "/logs/b.log".into(),
        },
    );

    wait_subscribed(&h.observer, "/logs/a.log");
    h.fs.append("/logs/a.log", "more\n");
    h.observer.emit("/logs/a.log", PathChange::Grew { len: 11 });
    assert!(h.recorder.wait_for(id, 4));
    thread::sleep(Duration::from_millis(50));

    assert_eq!(h.observer.subscriber_count("/logs/b.log"), 1);
    assert_eq!(h.recorder.added_lines(id), vec!["b1".to_string(), "more".to_string()]);
}

#[test]
fn same_path_twice_gives_independent_readers() {
    let h = harness();
    h.fs.add_file("/app.log", "x\n");

    let first = h.tailor.watch("/app.log").unwrap();
    let second = h.tailor.watch("/app.log").unwrap();
    assert_ne!(first, second);
    assert!(h.recorder.wait_for(first, 1));
    assert!(h.recorder.wait_for(second, 1));

    assert!(h.tailor.stop(first));
    h.fs.append("/app.log", "y\n");
    h.observer.emit("/app.log", PathChange::Grew { len: 4 });

    assert!(h.recorder.wait_for(second, 2));
    assert_eq!(h.recorder.added_lines(second), vec!["y".to_string()]);
    assert_eq!(h.recorder.for_client(first).len(), 1);
}

#[test]
fn nothing_is_delivered_after_stop_returns() {
    let h = harness_with(ConfigBuilder::new().queue_capacity(4));
    h.fs.add_file("/busy.log", "");
    let id = h.tailor.watch("/busy.log").unwrap();
    assert!(h.recorder.wait_for(id, 1));

    let running = Arc::new(AtomicBool::new(true));
    let writer = {
        let fs = h.fs.clone();
        let observer = h.observer.clone();
        let running = Arc::clone(&running);
        thread::spawn(move || {
            let mut n = 0u64;
            while running.load(Ordering::SeqCst) {
                fs.append("/busy.log", format!("line {n}\n"));
                n += 1;
                observer.emit("/busy.log", PathChange::Grew { len: 0 });
            }
        })
    };

    assert!(h.recorder.wait_for(id, 20));
    assert!(h.tailor.stop(id));
    let at_stop = h.recorder.for_client(id).len();

    thread::sleep(Duration::from_millis(200));
    running.store(false, Ordering::SeqCst);
    writer.join().unwrap();

    assert_eq!(h.recorder.for_client(id).len(), at_stop);
    assert!(!h.tailor.stop(id));
}

#[test]
fn lines_arrive_in_file_order_without_gaps() {
    let h = harness_with(ConfigBuilder::new().read_chunk_bytes(7));
    h.fs.add_file("/ordered.log", "");
    let id = h.tailor.watch("/ordered.log").unwrap();
    assert!(h.recorder.wait_for(id, 1));

    for n in 0..200 {
        h.fs.append("/ordered.log", format!("{n}\n"));
        if n % 3 == 0 {
            h.observer.emit("/ordered.log", PathChange::Grew { len: 0 });
        }
    }
    h.observer.emit("/ordered.log", PathChange::Rescan);

    assert!(h.recorder.wait_for_lines(id, 200));
    let expected: Vec<String> = (0..200).map(|n| n.to_string()).collect();
    assert_eq!(h.recorder.added_lines(id), expected);
}

#[test]
fn replaced_callback_is_never_called_again() {
    let h = harness();
    h.fs.add_file("/app.log", "");
    let id = h.tailor.watch("/app.log").unwrap();
    assert!(h.recorder.wait_for(id, 1));

    let second = Recorder::new();
    h.tailor.set_new_lines_callback(second.callback());
    let old_count = h.recorder.snapshot().len();

    h.fs.append("/app.log", "after swap\n");
    h.observer.emit("/app.log", PathChange::Grew { len: 11 });

    assert!(second.wait_for(id, 1));
    assert_eq!(second.for_client(id), vec![Received::added(id, &["after swap"])]);
    assert_eq!(h.recorder.snapshot().len(), old_count);
}

#[test]
fn stop_from_inside_the_callback() {
    let h = harness();
    h.fs.add_file("/app.log", "a\n");

    let calls = Arc::new(AtomicUsize::new(0));
    let stop_result = Arc::new(Mutex::new(None));
    {
        let engine = Arc::downgrade(&h.tailor);
        let calls = Arc::clone(&calls);
        let stop_result = Arc::clone(&stop_result);
        h.tailor.set_new_lines_callback(move |id, _msg_type, _lines| {
            calls.fetch_add(1, Ordering::SeqCst);
            if let Some(engine) = engine.upgrade() {
                *stop_result.lock().unwrap() = Some(engine.stop(id));
            }
        });
    }

    let id = h.tailor.watch("/app.log").unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while stop_result.lock().unwrap().is_none() {
        assert!(Instant::now() < deadline, "callback never ran");
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(*stop_result.lock().unwrap(), Some(true));

    h.fs.append("/app.log", "b\n");
    h.observer.emit("/app.log", PathChange::Grew { len: 4 });
    thread::sleep(Duration::from_millis(100));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!h.tailor.active_clients().contains(&id));
}

#[test]
fn observer_failure_retires_the_client() {
    let h = harness();
    h.fs.add_file("/app.log", "");
    let id = h.tailor.watch("/app.log").unwrap();
    assert!(h.recorder.wait_for(id, 1));

    h.observer.emit(
        "/app.log",
        PathChange::Failed {
            reason: "inotify queue overflow".to_string(),
        },
    );

    let deadline = Instant::now() + Duration::from_secs(5);
    while h.tailor.active_clients().contains(&id) {
        assert!(Instant::now() < deadline, "client was not retired");
        thread::sleep(Duration::from_millis(5));
    }
    assert!(!h.tailor.stop(id));

    // Other watches are unaffected.
    h.fs.add_file("/other.log", "ok\n");
    let other = h.tailor.watch("/other.log").unwrap();
    assert!(h.recorder.wait_for(other, 1));
    assert_eq!(h.recorder.for_client(other)[0].msg_type, MessageType::NewFileStarted);
}

#[test]
fn destroy_from_another_thread_while_delivering() {
    let h = harness();
    h.fs.add_file("/app.log", "1\n2\n3\n");
    let id = h.tailor.watch("/app.log").unwrap();
    assert!(h.recorder.wait_for(id, 1));

    let engine = Arc::clone(&h.tailor);
    thread::spawn(move || engine.destroy()).join().unwrap();

    assert!(h.tailor.is_destroyed());
    assert_eq!(h.observer.subscriber_count("/app.log"), 0);
    let before = h.recorder.snapshot().len();
    h.observer.emit("/app.log", PathChange::Grew { len: 99 });
    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.recorder.snapshot().len(), before);
}

#[test]
fn truncate_and_longer_rewrite_restarts_from_offset_zero() {
    let h = harness();
    h.fs.add_file("/app.log", "ab\n");
    let id = h.tailor.watch("/app.log").unwrap();
    assert!(h.recorder.wait_for(id, 1));

    // Same file, rewritten past the old end before anyone looked.
    h.fs.truncate("/app.log", 0);
    h.fs.append("/app.log", "new-one\nnew-two\n");
    h.observer.emit("/app.log", PathChange::Replaced);

    assert!(h.recorder.wait_for(id, 3));
    assert_eq!(
        h.recorder.for_client(id),
        vec![
            Received::started(id, &["ab"]),
            Received::started(id, &[]),
            Received::added(id, &["new-one", "new-two"]),
        ]
    );
}

#[test]
fn recreated_directory_is_tailed_again() {
    let h = harness();
    h.fs.add_file("/logs/a.log", "first\n");
    let id = h.tailor.watch("/logs").unwrap();
    assert!(h.recorder.wait_for(id, 1));

    h.fs.remove("/logs/a.log");
    h.fs.remove("/logs");
    h.observer.emit("/logs", PathChange::Removed);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.tailor.active_clients(), vec![id]);

    h.fs.add_file("/logs/b.log", "second\n");
    h.observer.emit("/logs", PathChange::Replaced);

    assert!(h.recorder.wait_for(id, 3));
    assert_eq!(
        h.recorder.for_client(id)[1..],
        [Received::started(id, &[]), Received::added(id, &["second"])]
    );
}

#[test]
fn idle_resync_catches_changes_nobody_reported() {
    let h = harness_with(ConfigBuilder::new().resync(30));
    h.fs.add_file("/quiet.log", "");
    h.fs.add_file("/dir/existing.log", "");
    let file_id = h.tailor.watch("/quiet.log").unwrap();
    let dir_id = h.tailor.watch("/dir").unwrap();
    assert!(h.recorder.wait_for(file_id, 1));
    assert!(h.recorder.wait_for(dir_id, 1));

    // No observer events at all from here on.
    h.fs.append("/quiet.log", "missed\n");
    h.fs.add_file("/dir/late.log", "also missed\n");

    assert!(h.recorder.wait_for_lines(file_id, 1));
    assert!(h.recorder.wait_for_lines(dir_id, 1));
    assert_eq!(h.recorder.added_lines(file_id), vec!["missed".to_string()]);
    assert_eq!(h.recorder.added_lines(dir_id), vec!["also missed".to_string()]);
}
