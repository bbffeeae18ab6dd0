//! Session Controller: owns the worker pool, the frame queue and the scanner
//! of one stacking run, and drives them through [`SessionState`].
//!
//! Commands are serialized on one lock. Pipeline threads never take that
//! lock; status, rendering and publishing go through [`Shared`].

pub mod events;
pub mod publish;
pub mod queue;
pub mod saver;
pub mod state;
mod worker;

use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::align::{FrameAligner, StarAligner};
use crate::config::SessionConfig;
use crate::error::{LiveStackError, Result};
use crate::frame::Image;
use crate::io::{FolderScanner, OutputFormat};
use crate::process::{PostProcessor, PreProcessor};
use crate::stack::{StackMethod, StackSnapshot, Stacker};

pub use events::{EventBus, SessionEvent, Severity};
pub use publish::{standby_image, FolderPublisher, PublishedView, WebPublisher};
pub use queue::BoundedQueue;
pub use saver::{ImageSaver, SaveRequest};
pub use state::SessionState;

use worker::{
    render_loop, scan_loop, timestamped_path, web_image_path, worker_loop, PipelineContext,
    RenderSignal,
};

/// Point-in-time view of a session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub alignment: bool,
    pub method: StackMethod,
    /// Frames read and waiting for a worker.
    pub queue_depth: usize,
    /// Deepest the frame queue has been this run.
    pub queue_high_water: usize,
    /// Frames folded into the stack this run.
    pub processed: usize,
    pub discarded: usize,
    pub stack_size: usize,
    /// Results waiting to be written.
    pub save_queue_depth: usize,
    pub web_address: Option<String>,
    pub started_at: Option<DateTime<Local>>,
}

/// State reachable from pipeline threads.
pub(crate) struct Shared {
    bus: Arc<EventBus>,
    stacker: Arc<Stacker>,
    saver: ImageSaver,
    web: Mutex<Box<dyn WebPublisher>>,
    latest: Mutex<Option<Arc<Image>>>,
    state: Mutex<SessionState>,
    started_at: Mutex<Option<DateTime<Local>>>,
    alignment: Mutex<bool>,
    pipeline: Mutex<Option<Arc<PipelineContext>>>,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn pipeline(&self) -> Option<Arc<PipelineContext>> {
        lock(&self.pipeline).clone()
    }

    fn set_latest(&self, image: Arc<Image>) {
        *lock(&self.latest) = Some(image);
    }

    fn latest(&self) -> Option<Arc<Image>> {
        lock(&self.latest).clone()
    }

    /// Hand `view` to the web publisher. Returns whether it is running.
    fn publish(&self, view: PublishedView) -> bool {
        let mut web = lock(&self.web);
        if !web.is_running() {
            return false;
        }
        web.publish(view);
        true
    }

    fn status(&self) -> SessionStatus {
        let pipeline = self.pipeline();
        SessionStatus {
            state: self.state(),
            alignment: *lock(&self.alignment),
            method: self.stacker.method(),
            queue_depth: pipeline.as_ref().map_or(0, |p| p.queue.len()),
            queue_high_water: pipeline.as_ref().map_or(0, |p| p.queue.high_water_mark()),
            processed: pipeline.as_ref().map_or(0, |p| p.processed()),
            discarded: pipeline.as_ref().map_or(0, |p| p.discarded()),
            stack_size: self.stacker.frame_count(),
            save_queue_depth: self.saver.pending(),
            web_address: lock(&self.web).address(),
            started_at: *lock(&self.started_at),
        }
    }
}

struct ScannerTask {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<FolderScanner>,
}

/// Threads and handles of one running session.
struct Run {
    ctx: Arc<PipelineContext>,
    workers: Vec<JoinHandle<()>>,
    renderer: Option<JoinHandle<()>>,
    scanner: Option<ScannerTask>,
    /// Scanner parked while paused.
    parked: Option<FolderScanner>,
    scan_interval: Duration,
}

impl Run {
    fn spawn_scanner(&mut self, scanner: FolderScanner) -> Result<()> {
        let (stop_tx, stop_rx) = mpsc::channel();
        let ctx = Arc::clone(&self.ctx);
        let interval = self.scan_interval;
        let folder = scanner.folder().to_path_buf();
        let handle = std::thread::Builder::new()
            .name("livestack-scanner".into())
            .spawn(move || scan_loop(ctx, scanner, stop_rx, interval))
            .map_err(|e| LiveStackError::Allocation(format!("scanner thread: {e}")))?;
        self.scanner = Some(ScannerTask { stop_tx, handle });
        self.ctx.bus.emit(SessionEvent::ScannerStarted { folder });
        Ok(())
    }

    /// Stop the scanner thread and park its state. A scanner blocked on a
    /// full queue is released by suspending admission first.
    fn stop_scanner(&mut self) {
        let Some(task) = self.scanner.take() else {
            return;
        };
        self.ctx.queue.suspend_admission();
        let _ = task.stop_tx.send(());
        match task.handle.join() {
            Ok(scanner) => self.parked = Some(scanner),
            Err(_) => warn!("Scanner thread panicked"),
        }
        self.ctx.bus.emit(SessionEvent::ScannerStopped);
    }

    /// Drain the queue, join every thread and flush the final rendering.
    /// Returns false if a pipeline thread panicked.
    fn shut_down(mut self) -> bool {
        self.stop_scanner();
        self.ctx.queue.close();
        let mut clean = true;
        for worker in self.workers.drain(..) {
            clean &= worker.join().is_ok();
        }
        self.ctx.shutdown_renderer();
        if let Some(renderer) = self.renderer.take() {
            clean &= renderer.join().is_ok();
        }
        clean
    }
}

/// A live stacking session.
pub struct Session {
    config: RwLock<SessionConfig>,
    aligner: Arc<dyn FrameAligner>,
    shared: Arc<Shared>,
    control: Mutex<Option<Run>>,
}

impl Session {
    /// Session with the star aligner and the folder publisher.
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::with_components(config, Arc::new(StarAligner), Box::new(FolderPublisher::new()))
    }

    pub fn with_components(
        config: SessionConfig,
        aligner: Arc<dyn FrameAligner>,
        publisher: Box<dyn WebPublisher>,
    ) -> Result<Self> {
        let bus = Arc::new(EventBus::new());
        let saver = ImageSaver::spawn(Arc::clone(&bus))?;
        let stacker = Arc::new(Stacker::new(
            config.stacking.method,
            config.stacking.normalization,
        ));
        let shared = Arc::new(Shared {
            bus,
            stacker,
            saver,
            web: Mutex::new(publisher),
            latest: Mutex::new(None),
            state: Mutex::new(SessionState::Idle),
            started_at: Mutex::new(None),
            alignment: Mutex::new(config.alignment.enabled),
            pipeline: Mutex::new(None),
        });
        Ok(Self {
            config: RwLock::new(config),
            aligner,
            shared,
            control: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> mpsc::Receiver<SessionEvent> {
        self.shared.bus.subscribe()
    }

    pub fn config(&self) -> SessionConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status()
    }

    /// Copy of the running stack, `None` before the first accepted frame.
    pub fn snapshot(&self) -> Option<StackSnapshot> {
        self.shared.stacker.snapshot()
    }

    /// Latest rendered result with the current status.
    pub fn current_view(&self) -> Option<PublishedView> {
        let image = self.shared.latest()?;
        Some(PublishedView {
            image,
            status: self.status(),
        })
    }

    fn transition(&self, to: SessionState, command: &'static str) -> Result<()> {
        let mut state = lock(&self.shared.state);
        let from = *state;
        if !from.can_transition_to(to) {
            return Err(LiveStackError::InvalidTransition {
                command,
                state: from,
            });
        }
        *state = to;
        drop(state);
        self.shared.bus.emit(SessionEvent::StateChanged { from, to });
        Ok(())
    }

    /// Reset the stack, spin up the pipeline and start scanning.
    ///
    /// Only failures to validate the configuration, find the folders or
    /// allocate threads are returned; the session is then back in `Idle`.
    pub fn start(&self) -> Result<()> {
        let mut control = lock(&self.control);
        self.transition(SessionState::Starting, "start")?;
        self.shared.bus.emit(SessionEvent::SessionStarting);

        let config = self.config();
        match self.launch(&config) {
            Ok(run) => {
                *lock(&self.shared.pipeline) = Some(Arc::clone(&run.ctx));
                *control = Some(run);
                *lock(&self.shared.started_at) = Some(Local::now());
                *lock(&self.shared.alignment) = config.alignment.enabled;
                self.transition(SessionState::Running, "start")?;
                self.shared.bus.emit(SessionEvent::SessionRunning {
                    method: config.stacking.method,
                    alignment: config.alignment.enabled,
                });
                if config.web.autostart {
                    // Failure is reported by the call and degrades the session only.
                    let _ = self.start_web_server();
                }
                Ok(())
            }
            Err(e) => {
                self.shared.bus.emit(SessionEvent::SessionError {
                    cause: e.to_string(),
                });
                self.transition(SessionState::Error, "start")?;
                self.clear();
                self.transition(SessionState::Idle, "start")?;
                Err(e)
            }
        }
    }

    fn launch(&self, config: &SessionConfig) -> Result<Run> {
        config.validate()?;
        check_folder("scan", &config.paths.scan_folder)?;
        check_folder("work", &config.paths.work_folder)?;

        self.shared
            .stacker
            .reset(config.stacking.method, config.stacking.normalization);
        *lock(&self.shared.latest) = None;

        let (pre, issue) = PreProcessor::build(&config.preprocess, None);
        if let Some(e) = issue {
            self.shared.bus.emit(SessionEvent::CalibrationUnavailable {
                path: config.preprocess.dark.path.clone(),
                reason: e.to_string(),
            });
        }
        let post = PostProcessor::from_config(&config.postprocess);
        let scanner = FolderScanner::new(&config.paths.scan_folder, config.include_existing)?
            .with_bayer_pattern(config.bayer_pattern);

        let (render_tx, render_rx) = mpsc::channel();
        let ctx = Arc::new(PipelineContext::new(
            Arc::clone(&self.shared.bus),
            config.queue_size,
            Arc::clone(&self.shared.stacker),
            Arc::clone(&self.aligner),
            config.alignment.clone(),
            config.output.clone(),
            config.paths.work_folder.clone(),
            pre,
            post,
            render_tx,
        ));
        let mut run = Run {
            ctx: Arc::clone(&ctx),
            workers: Vec::with_capacity(config.workers),
            renderer: None,
            scanner: None,
            parked: None,
            scan_interval: Duration::from_millis(config.scan_interval_ms),
        };

        if let Err(e) = spawn_threads(&mut run, config.workers, &self.shared, render_rx) {
            run.shut_down();
            return Err(e);
        }
        if let Err(e) = run.spawn_scanner(scanner) {
            run.shut_down();
            return Err(e);
        }
        info!(
            workers = config.workers,
            queue_size = config.queue_size,
            scan_folder = %config.paths.scan_folder.display(),
            "Session pipeline started"
        );
        Ok(run)
    }

    /// Stop scanning and hold queued frames. Frames already taken by a
    /// worker finish.
    pub fn pause(&self) -> Result<()> {
        let mut control = lock(&self.control);
        self.transition(SessionState::Paused, "pause")?;
        if let Some(run) = control.as_mut() {
            run.ctx.queue.hold();
            run.stop_scanner();
        }
        self.shared.bus.emit(SessionEvent::SessionPaused);
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        let mut control = lock(&self.control);
        if self.state() != SessionState::Paused {
            return Err(LiveStackError::InvalidTransition {
                command: "resume",
                state: self.state(),
            });
        }
        if let Some(run) = control.as_mut() {
            run.ctx.queue.resume_admission();
            run.ctx.queue.release();
            if let Some(scanner) = run.parked.take() {
                if let Err(e) = run.spawn_scanner(scanner) {
                    return Err(self.abort_run(&mut control, e));
                }
            }
        }
        self.transition(SessionState::Running, "resume")
    }

    /// Stop scanning, process every queued frame, write the final result and
    /// return to `Idle` with an empty stack.
    pub fn stop(&self) -> Result<()> {
        let mut control = lock(&self.control);
        self.transition(SessionState::Stopping, "stop")?;
        let clean = control.take().map_or(true, Run::shut_down);
        self.shared.saver.flush();

        if clean {
            self.clear();
            self.transition(SessionState::Idle, "stop")?;
            self.shared.bus.emit(SessionEvent::SessionStopped);
        } else {
            self.shared.bus.emit(SessionEvent::SessionError {
                cause: "a pipeline thread panicked".into(),
            });
            self.transition(SessionState::Error, "stop")?;
            self.clear();
            self.transition(SessionState::Idle, "stop")?;
        }
        Ok(())
    }

    /// Tear down a run that lost a resource it cannot continue without.
    /// Queued frames are still processed; the session ends in `Idle`.
    fn abort_run(&self, control: &mut Option<Run>, cause: LiveStackError) -> LiveStackError {
        warn!(error = %cause, "Aborting the session");
        self.shared.bus.emit(SessionEvent::SessionError {
            cause: cause.to_string(),
        });
        if let Err(e) = self.transition(SessionState::Error, "abort") {
            warn!(error = %e, "Unexpected state while aborting");
        }
        if let Some(run) = control.take() {
            if !run.shut_down() {
                warn!("A pipeline thread panicked");
            }
        }
        self.shared.saver.flush();
        self.clear();
        if let Err(e) = self.transition(SessionState::Idle, "abort") {
            warn!(error = %e, "Unexpected state while aborting");
        }
        cause
    }

    fn clear(&self) {
        *lock(&self.shared.pipeline) = None;
        *lock(&self.shared.latest) = None;
        *lock(&self.shared.started_at) = None;
        let stacker = &self.shared.stacker;
        stacker.reset(stacker.method(), stacker.normalization());
    }

    /// Restart the frame source on the configured scan folder, keeping the
    /// stack. While paused the new scanner starts on resume.
    ///
    /// On the same folder the scanner keeps the files it has already seen.
    /// On a new folder, frames read but not yet admitted still come first.
    pub fn restart_scanner(&self) -> Result<()> {
        let mut control = lock(&self.control);
        let state = self.state();
        let Some(run) = control.as_mut().filter(|_| state.is_active()) else {
            return Err(LiveStackError::InvalidTransition {
                command: "restart scanner",
                state,
            });
        };
        self.shared.bus.emit(SessionEvent::ScannerRestarting);
        run.stop_scanner();

        let config = self.config();
        let folder = &config.paths.scan_folder;
        let replacement = match run.parked.take() {
            Some(previous) if previous.folder() == folder.as_path() => Ok(previous),
            previous => match FolderScanner::new(folder, config.include_existing) {
                Ok(scanner) => Ok(match previous {
                    Some(mut previous) => scanner.with_backlog(previous.take_backlog()),
                    None => scanner,
                }),
                Err(e) => {
                    run.parked = previous;
                    Err(e)
                }
            },
        };
        let scanner = match replacement {
            Ok(scanner) => scanner.with_bayer_pattern(config.bayer_pattern),
            Err(e) => {
                warn!(error = %e, "Keeping the previous scan folder");
                if state == SessionState::Running {
                    run.ctx.queue.resume_admission();
                    if let Some(previous) = run.parked.take() {
                        if let Err(spawn) = run.spawn_scanner(previous) {
                            return Err(self.abort_run(&mut control, spawn));
                        }
                    }
                }
                return Err(e);
            }
        };
        if state == SessionState::Running {
            run.ctx.queue.resume_admission();
            if let Err(e) = run.spawn_scanner(scanner) {
                return Err(self.abort_run(&mut control, e));
            }
        } else {
            run.parked = Some(scanner);
        }
        Ok(())
    }

    /// Replace the preferences. Processing chains take effect on the next
    /// frame; everything else at the next start.
    pub fn update_config(&self, config: SessionConfig) -> Result<()> {
        config.validate()?;
        if let Some(ctx) = self.shared.pipeline() {
            let previous = ctx.pre();
            let (pre, issue) = PreProcessor::build(&config.preprocess, Some(&previous));
            if let Some(e) = issue {
                self.shared.bus.emit(SessionEvent::CalibrationUnavailable {
                    path: config.preprocess.dark.path.clone(),
                    reason: e.to_string(),
                });
            }
            *ctx.pre.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(pre);
            *ctx.post.write().unwrap_or_else(PoisonError::into_inner) =
                Arc::new(PostProcessor::from_config(&config.postprocess));
            debug!("Processing chains updated");
        }
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    /// Queue a timestamped copy of the latest result in the work folder.
    pub fn save_current(&self) -> Result<PathBuf> {
        let image = self
            .shared
            .latest()
            .ok_or_else(|| LiveStackError::Precondition("no stacked image to save yet".into()))?;
        let config = self.config();
        let path = timestamped_path(&config.paths.work_folder, config.output.format);
        let submitted = self.shared.saver.submit(SaveRequest {
            image,
            path: path.clone(),
            format: config.output.format,
        });
        if !submitted {
            return Err(LiveStackError::Allocation("image saver is not running".into()));
        }
        Ok(path)
    }

    /// Block until every queued save has been written.
    pub fn flush_saves(&self) {
        self.shared.saver.flush();
    }

    /// Start the web preview on the configured port and publish the latest
    /// result, or a standby image before the first one. A failure is
    /// reported and returned; the session carries on without preview.
    pub fn start_web_server(&self) -> Result<String> {
        let web = self.config().web;
        let result = web
            .validate()
            .and_then(|()| lock(&self.shared.web).start(web.port));
        match result {
            Ok(address) => {
                self.shared.bus.emit(SessionEvent::WebServerStarted {
                    address: address.clone(),
                });
                let image = self
                    .shared
                    .latest()
                    .unwrap_or_else(|| Arc::new(standby_image()));
                let status = self.status();
                self.shared.publish(PublishedView {
                    image: Arc::clone(&image),
                    status,
                });
                let work_folder = self.config().paths.work_folder;
                if work_folder.is_dir() {
                    self.shared.saver.submit(SaveRequest {
                        image,
                        path: web_image_path(&work_folder),
                        format: OutputFormat::Jpeg,
                    });
                }
                Ok(address)
            }
            Err(e) => {
                self.shared.bus.emit(SessionEvent::WebServerFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub fn stop_web_server(&self) {
        let mut web = lock(&self.shared.web);
        if web.is_running() {
            web.stop();
            drop(web);
            self.shared.bus.emit(SessionEvent::WebServerStopped);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state().is_active() {
            if let Err(e) = self.stop() {
                warn!(error = %e, "Session did not stop cleanly");
            }
        }
        self.stop_web_server();
        self.shared.saver.flush();
    }
}

fn check_folder(role: &'static str, path: &Path) -> Result<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(LiveStackError::MissingFolder {
            role,
            path: path.to_path_buf(),
        })
    }
}

fn spawn_threads(
    run: &mut Run,
    workers: usize,
    shared: &Arc<Shared>,
    render_rx: mpsc::Receiver<RenderSignal>,
) -> Result<()> {
    for i in 0..workers {
        let ctx = Arc::clone(&run.ctx);
        let handle = std::thread::Builder::new()
            .name(format!("livestack-worker-{i}"))
            .spawn(move || worker_loop(ctx))
            .map_err(|e| LiveStackError::Allocation(format!("worker thread: {e}")))?;
        run.workers.push(handle);
    }
    let ctx = Arc::clone(&run.ctx);
    let shared = Arc::clone(shared);
    let handle = std::thread::Builder::new()
        .name("livestack-renderer".into())
        .spawn(move || render_loop(shared, ctx, render_rx))
        .map_err(|e| LiveStackError::Allocation(format!("renderer thread: {e}")))?;
    run.renderer = Some(handle);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn lost_scanner_thread_ends_the_run_in_idle() {
        let root = TempDir::new().unwrap();
        let scan = root.path().join("scan");
        let work = root.path().join("work");
        fs::create_dir(&scan).unwrap();
        fs::create_dir(&work).unwrap();
        let session = Session::new(SessionConfig::new(&scan, &work)).unwrap();
        let events = session.subscribe();
        session.start().unwrap();
        session.pause().unwrap();

        let mut control = lock(&session.control);
        let cause = LiveStackError::Allocation("scanner thread: no resources".into());
        let err = session.abort_run(&mut control, cause);
        assert!(control.is_none());
        drop(control);

        assert!(matches!(err, LiveStackError::Allocation(_)));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.shared.pipeline().is_none());
        let events: Vec<_> = events.try_iter().collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::SessionError { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::StateChanged {
                from: SessionState::Paused,
                to: SessionState::Error
            }
        )));

        session.start().unwrap();
        session.stop().unwrap();
    }
}
