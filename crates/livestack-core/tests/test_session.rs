#[allow(dead_code)]
mod common;

use std::fs;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use approx::assert_abs_diff_eq;
use tempfile::TempDir;

use livestack_core::config::SessionConfig;
use livestack_core::error::LiveStackError;
use livestack_core::frame::Pixels;
use livestack_core::io::OutputFormat;
use livestack_core::session::{FolderPublisher, Session, SessionEvent, SessionState};
use livestack_core::stack::StackMethod;

use common::{drop_frame, flat_frame, test_config, wait_for, ScriptedAligner};

const TIMEOUT: Duration = Duration::from_secs(20);

struct Folders {
    _root: TempDir,
    scan: PathBuf,
    work: PathBuf,
    staging: PathBuf,
}

fn folders() -> Folders {
    let root = TempDir::new().unwrap();
    let scan = root.path().join("scan");
    let work = root.path().join("work");
    let staging = root.path().join("staging");
    for dir in [&scan, &work, &staging] {
        fs::create_dir(dir).unwrap();
    }
    Folders {
        _root: root,
        scan,
        work,
        staging,
    }
}

fn drop_flat_frames(f: &Folders, count: usize, size: usize, prefix: &str) {
    for i in 0..count {
        let image = flat_frame(size, size, 0.1 + 0.05 * i as f32);
        drop_frame(&f.scan, &f.staging, &format!("{prefix}{i:02}.tif"), &image);
    }
}

fn session(config: SessionConfig, aligner: ScriptedAligner) -> Session {
    Session::with_components(config, Arc::new(aligner), Box::new(FolderPublisher::new())).unwrap()
}

fn wait_until_handled(session: &Session, total: usize) -> bool {
    wait_for(TIMEOUT, || {
        let status = session.status();
        status.processed + status.discarded >= total
    })
}

fn drain(events: &Receiver<SessionEvent>) -> Vec<SessionEvent> {
    events.try_iter().collect()
}

#[test]
fn test_frame_below_match_threshold_is_discarded() {
    let f = folders();
    drop_flat_frames(&f, 5, 100, "light");
    let mut config = test_config(&f.scan, &f.work);
    config.alignment.min_matches = 20;
    let aligner = ScriptedAligner::new(20)
        .with("light00.tif", 31)
        .with("light01.tif", 24)
        .with("light02.tif", 15);

    let session = session(config, aligner);
    let events = session.subscribe();
    session.start().unwrap();
    assert!(wait_until_handled(&session, 5));

    let status = session.status();
    assert_eq!(status.stack_size, 4);
    assert_eq!(status.processed, 4);
    assert_eq!(status.discarded, 1);

    let discarded: Vec<_> = drain(&events)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::FrameDiscarded { target, reason } => Some((target, reason)),
            _ => None,
        })
        .collect();
    assert_eq!(discarded.len(), 1);
    assert_eq!(discarded[0].0, "light02.tif");
    assert!(discarded[0].1.contains("insufficient matches"));

    session.stop().unwrap();
}

#[test]
fn test_full_queue_suspends_scanning_without_dropping_frames() {
    let f = folders();
    drop_flat_frames(&f, 10, 40, "burst");
    let mut config = test_config(&f.scan, &f.work);
    config.queue_size = 2;
    config.workers = 1;
    let aligner = ScriptedAligner::new(100).with_delay(Duration::from_millis(40));

    let session = session(config, aligner);
    session.start().unwrap();
    assert!(wait_until_handled(&session, 10));

    let status = session.status();
    assert_eq!(status.processed, 10);
    assert_eq!(status.discarded, 0);
    assert_eq!(status.stack_size, 10);
    assert!(status.queue_high_water <= 2);
    assert!(status.queue_high_water >= 1);
    session.stop().unwrap();
}

#[test]
fn test_sum_session_matches_elementwise_sum() {
    let f = folders();
    drop_flat_frames(&f, 4, 32, "sum");
    let mut config = test_config(&f.scan, &f.work);
    config.stacking.method = StackMethod::Sum;
    config.workers = 3;

    let session = session(config, ScriptedAligner::new(100));
    session.start().unwrap();
    assert!(wait_until_handled(&session, 4));

    let snapshot = session.snapshot().unwrap();
    let Pixels::Mono(frame) = &snapshot.pixels else {
        panic!("expected mono stack");
    };
    let expected: f32 = (0..4).map(|i| 0.1 + 0.05 * i as f32).sum();
    assert_abs_diff_eq!(frame.data[[5, 5]], expected, epsilon = 1e-3);
    session.stop().unwrap();
}

#[test]
fn test_pause_holds_frames_until_resume() {
    let f = folders();
    drop_flat_frames(&f, 6, 32, "held");
    let mut config = test_config(&f.scan, &f.work);
    config.workers = 1;
    config.queue_size = 4;
    let aligner = ScriptedAligner::new(100).with_delay(Duration::from_millis(80));

    let session = session(config, aligner);
    session.start().unwrap();
    assert!(wait_for(TIMEOUT, || session.status().processed >= 1));

    session.pause().unwrap();
    assert_eq!(session.state(), SessionState::Paused);
    assert!(matches!(
        session.pause(),
        Err(LiveStackError::InvalidTransition { .. })
    ));

    // Let the in-flight frame finish, then nothing more may move.
    std::thread::sleep(Duration::from_millis(300));
    let held = session.status().processed;
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(session.status().processed, held);
    assert!(held < 6);

    session.resume().unwrap();
    assert!(wait_until_handled(&session, 6));
    let status = session.status();
    assert_eq!(status.stack_size, 6);
    assert_eq!(status.processed, 6);
    session.stop().unwrap();
}

#[test]
fn test_stop_then_start_begins_a_fresh_stack() {
    let f = folders();
    drop_flat_frames(&f, 3, 48, "first");
    let config = test_config(&f.scan, &f.work);
    let session = session(config, ScriptedAligner::new(100));

    session.start().unwrap();
    assert!(wait_until_handled(&session, 3));
    session.stop().unwrap();

    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.snapshot().is_none());
    assert_eq!(session.status().stack_size, 0);
    assert!(f.work.join("stack_image.tif").is_file());

    for entry in fs::read_dir(&f.scan).unwrap() {
        fs::remove_file(entry.unwrap().path()).unwrap();
    }
    drop_flat_frames(&f, 2, 24, "second");

    session.start().unwrap();
    assert!(wait_until_handled(&session, 2));
    let snapshot = session.snapshot().unwrap();
    assert_eq!(snapshot.frame_count, 2);
    assert_eq!(snapshot.geometry().width, 24);
    session.stop().unwrap();
}

#[test]
fn test_mismatched_geometry_is_discarded_in_session() {
    let f = folders();
    drop_flat_frames(&f, 1, 30, "a");
    let config = test_config(&f.scan, &f.work);
    let session = session(config, ScriptedAligner::new(100));
    session.start().unwrap();
    assert!(wait_until_handled(&session, 1));

    drop_flat_frames(&f, 1, 20, "b");
    assert!(wait_until_handled(&session, 2));
    let status = session.status();
    assert_eq!(status.stack_size, 1);
    assert_eq!(status.discarded, 1);
    session.stop().unwrap();
}

#[test]
fn test_missing_folder_aborts_start() {
    let f = folders();
    let config = test_config(&f.scan.join("missing"), &f.work);
    let session = session(config, ScriptedAligner::new(100));
    let events = session.subscribe();

    let err = session.start().unwrap_err();
    assert!(matches!(err, LiveStackError::MissingFolder { role: "scan", .. }));
    assert_eq!(session.state(), SessionState::Idle);

    let events = drain(&events);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::SessionError { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::StateChanged {
            from: SessionState::Error,
            to: SessionState::Idle
        }
    )));
}

#[test]
fn test_commands_are_checked_against_state() {
    let f = folders();
    let session = session(test_config(&f.scan, &f.work), ScriptedAligner::new(100));
    assert!(session.pause().is_err());
    assert!(session.resume().is_err());
    assert!(session.stop().is_err());
    assert!(session.restart_scanner().is_err());
    assert!(session.save_current().is_err());
}

#[test]
fn test_results_are_saved_and_published() {
    let f = folders();
    drop_flat_frames(&f, 2, 32, "out");
    let mut config = test_config(&f.scan, &f.work);
    config.output.format = OutputFormat::Png;
    config.output.save_every_image = true;
    let busy = TcpListener::bind(("0.0.0.0", 0)).unwrap();
    config.web.port = busy.local_addr().unwrap().port();

    let session = session(config, ScriptedAligner::new(100));
    session.start().unwrap();
    assert!(wait_until_handled(&session, 2));
    assert!(wait_for(TIMEOUT, || session.current_view().is_some()));

    let saved = session.save_current().unwrap();
    session.flush_saves();
    assert!(saved.is_file());
    assert!(f.work.join("stack_image.png").is_file());

    let timestamped = fs::read_dir(&f.work)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.starts_with("stack_image-") && name.ends_with(".png")
        })
        .count();
    assert!(timestamped >= 2);

    // The port is taken: reported, and the session keeps running.
    let events = session.subscribe();
    assert!(session.start_web_server().is_err());
    assert!(drain(&events)
        .iter()
        .any(|e| matches!(e, SessionEvent::WebServerFailed { .. })));
    assert_eq!(session.state(), SessionState::Running);
    session.stop().unwrap();
}

#[test]
fn test_restart_scanner_keeps_the_stack() {
    let f = folders();
    drop_flat_frames(&f, 2, 32, "keep");
    let config = test_config(&f.scan, &f.work);
    let session = session(config, ScriptedAligner::new(100));
    session.start().unwrap();
    assert!(wait_until_handled(&session, 2));

    session.restart_scanner().unwrap();
    // Same folder: files already stacked are not read again.
    std::thread::sleep(Duration::from_millis(400));
    let status = session.status();
    assert_eq!(status.stack_size, 2);
    assert_eq!(status.processed, 2);

    drop_flat_frames(&f, 1, 32, "late");
    assert!(wait_until_handled(&session, 3));
    assert_eq!(session.status().stack_size, 3);
    session.stop().unwrap();
}

#[test]
fn test_restart_scanner_on_a_full_queue_loses_no_frames() {
    let f = folders();
    let mut config = test_config(&f.scan, &f.work);
    config.include_existing = false;
    config.queue_size = 1;
    config.workers = 1;
    let aligner = ScriptedAligner::new(100).with_delay(Duration::from_millis(300));
    let session = session(config, aligner);
    session.start().unwrap();

    drop_flat_frames(&f, 6, 32, "busy");
    // One frame in the worker, one queued, the scanner waiting on the next.
    assert!(wait_for(TIMEOUT, || session.status().queue_depth == 1));
    std::thread::sleep(Duration::from_millis(100));
    session.restart_scanner().unwrap();

    assert!(wait_until_handled(&session, 6));
    std::thread::sleep(Duration::from_millis(200));
    let status = session.status();
    assert_eq!(status.processed, 6);
    assert_eq!(status.stack_size, 6);
    session.stop().unwrap();
}

#[test]
fn test_stop_processes_every_admitted_frame() {
    let f = folders();
    drop_flat_frames(&f, 6, 32, "drain");
    let mut config = test_config(&f.scan, &f.work);
    config.queue_size = 2;
    config.workers = 1;
    let aligner = ScriptedAligner::new(100).with_delay(Duration::from_millis(150));
    let session = session(config, aligner);
    let rx = session.subscribe();
    session.start().unwrap();

    assert!(wait_for(TIMEOUT, || session.status().queue_depth == 2));
    session.stop().unwrap();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(f.work.join("stack_image.tif").is_file());

    let events = drain(&rx);
    let reads = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::ImageRead { .. }))
        .count();
    let mut handled: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::FrameStacked { target, .. } => Some(target.as_str()),
            SessionEvent::FrameDiscarded { target, .. } => Some(target.as_str()),
            _ => None,
        })
        .collect();
    let total = handled.len();
    handled.sort_unstable();
    handled.dedup();
    assert_eq!(handled.len(), total);
    // The one in the worker plus the two queued, at least.
    assert!(total >= 3);
    // Only a frame read while admission was being suspended may go unstacked.
    assert!(total <= reads);
    assert!(total + 1 >= reads);

    std::thread::sleep(Duration::from_millis(300));
    assert!(!drain(&rx)
        .iter()
        .any(|e| matches!(e, SessionEvent::FrameStacked { .. })));
}

#[test]
fn test_web_start_serves_a_standby_image() {
    let f = folders();
    let mut config = test_config(&f.scan, &f.work);
    let free = TcpListener::bind(("0.0.0.0", 0)).unwrap();
    config.web.port = free.local_addr().unwrap().port();
    drop(free);

    let session = session(config, ScriptedAligner::new(100));
    let events = session.subscribe();
    let address = session.start_web_server().unwrap();
    assert!(address.ends_with(&session.config().web.port.to_string()));
    session.flush_saves();

    assert!(f.work.join("web_image.jpg").is_file());
    assert!(session.current_view().is_none());
    assert_eq!(session.status().web_address, Some(address));
    assert!(drain(&events)
        .iter()
        .any(|e| matches!(e, SessionEvent::WebServerStarted { .. })));
    session.stop_web_server();
}
