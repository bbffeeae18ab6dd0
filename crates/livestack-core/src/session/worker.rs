//! Per-run pipeline context and the threads that drive it: the frame scanner,
//! the worker pool and the renderer.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Local;
use tracing::debug;

use super::events::{EventBus, SessionEvent};
use super::publish::PublishedView;
use super::queue::BoundedQueue;
use super::saver::SaveRequest;
use super::Shared;
use crate::align::{warp_image, AlignmentTransform, FrameAligner, Reference};
use crate::config::{AlignmentConfig, OutputConfig};
use crate::consts::{STACKED_IMAGE_FILE_NAME_BASE, WEB_SERVED_IMAGE_FILE_NAME_BASE};
use crate::error::{LiveStackError, Result};
use crate::frame::Image;
use crate::io::{FolderScanner, OutputFormat};
use crate::process::{PostProcessor, PreProcessor, StepReport};
use crate::stack::Stacker;

const ALIGNMENT_STEP: &str = "alignment";
const STACKING_STEP: &str = "stacking";
const RENDER_TARGET: &str = "stack result";

pub(crate) enum RenderSignal {
    StackUpdated,
    Shutdown,
}

/// Everything one session run shares between its threads. Created on start,
/// dropped once the run is torn down.
pub(crate) struct PipelineContext {
    pub bus: Arc<EventBus>,
    pub queue: BoundedQueue<Image>,
    pub stacker: Arc<Stacker>,
    pub aligner: Arc<dyn FrameAligner>,
    pub alignment: AlignmentConfig,
    pub output: OutputConfig,
    pub work_folder: PathBuf,
    pub pre: RwLock<Arc<PreProcessor>>,
    pub post: RwLock<Arc<PostProcessor>>,
    reference: Mutex<Option<Arc<Reference>>>,
    processed: AtomicUsize,
    discarded: AtomicUsize,
    render_tx: mpsc::Sender<RenderSignal>,
}

impl PipelineContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<EventBus>,
        queue_size: usize,
        stacker: Arc<Stacker>,
        aligner: Arc<dyn FrameAligner>,
        alignment: AlignmentConfig,
        output: OutputConfig,
        work_folder: PathBuf,
        pre: PreProcessor,
        post: PostProcessor,
        render_tx: mpsc::Sender<RenderSignal>,
    ) -> Self {
        Self {
            bus,
            queue: BoundedQueue::new(queue_size),
            stacker,
            aligner,
            alignment,
            output,
            work_folder,
            pre: RwLock::new(Arc::new(pre)),
            post: RwLock::new(Arc::new(post)),
            reference: Mutex::new(None),
            processed: AtomicUsize::new(0),
            discarded: AtomicUsize::new(0),
            render_tx,
        }
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn discarded(&self) -> usize {
        self.discarded.load(Ordering::SeqCst)
    }

    pub fn pre(&self) -> Arc<PreProcessor> {
        Arc::clone(&self.pre.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn post(&self) -> Arc<PostProcessor> {
        Arc::clone(&self.post.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn request_render(&self) {
        let _ = self.render_tx.send(RenderSignal::StackUpdated);
    }

    pub fn shutdown_renderer(&self) {
        let _ = self.render_tx.send(RenderSignal::Shutdown);
    }

    fn report(&self, report: StepReport, target: &str) {
        let event = match report {
            StepReport::Started { step } => SessionEvent::StepStarted {
                step,
                target: target.to_string(),
            },
            StepReport::Finished { step, elapsed } => SessionEvent::StepFinished {
                step,
                target: target.to_string(),
                elapsed,
            },
            StepReport::Skipped { step, reason } => SessionEvent::StepSkipped {
                step,
                target: target.to_string(),
                reason,
            },
        };
        self.bus.emit(event);
    }

    /// Run `f` as a timed step, reporting start and end.
    fn timed<T>(&self, step: &'static str, target: &str, f: impl FnOnce() -> T) -> T {
        self.report(StepReport::Started { step }, target);
        let start = Instant::now();
        let out = f();
        self.report(
            StepReport::Finished {
                step,
                elapsed: start.elapsed(),
            },
            target,
        );
        out
    }

    /// The session reference, established from `image` if there is none yet.
    fn reference_for(&self, image: &Image) -> Result<Arc<Reference>> {
        let mut reference = self.reference.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = reference.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let created = if self.alignment.enabled {
            self.aligner.reference(image, &self.alignment)?
        } else {
            Reference::geometry_only(image.geometry())
        };
        debug!(
            geometry = %created.geometry,
            stars = created.stars.len(),
            source = %image.name(),
            "Reference established"
        );
        let created = Arc::new(created);
        *reference = Some(Arc::clone(&created));
        Ok(created)
    }

    fn align(&self, image: Image, target: &str) -> Result<Image> {
        let reference = self.reference_for(&image)?;
        if image.geometry() != reference.geometry {
            return Err(LiveStackError::GeometryMismatch {
                expected: reference.geometry,
                actual: image.geometry(),
            });
        }
        if !self.alignment.enabled {
            return Ok(image);
        }
        let transform: AlignmentTransform = self.timed(ALIGNMENT_STEP, target, || {
            self.aligner.register(&reference, &image, &self.alignment)
        })?;
        if !transform.is_valid(self.alignment.min_matches) {
            return Err(LiveStackError::InsufficientMatches {
                found: transform.matches,
                required: self.alignment.min_matches,
            });
        }
        debug!(
            matches = transform.matches,
            dx = transform.transform.tx,
            dy = transform.transform.ty,
            rotation = transform.transform.rotation(),
            "Frame registered"
        );
        Ok(warp_image(&image, &transform.transform))
    }

    /// Pre-process, align and stack one frame. Any failure discards the frame.
    pub fn process_frame(&self, image: Image) {
        let target = image.name();
        let image = self.pre().process(image, |r| self.report(r, &target));

        let stacked = self
            .align(image, &target)
            .and_then(|aligned| {
                self.timed(STACKING_STEP, &target, || self.stacker.accumulate(&aligned))
            });

        match stacked {
            Ok(frame_count) => {
                self.processed.fetch_add(1, Ordering::SeqCst);
                self.bus.emit(SessionEvent::FrameStacked {
                    target,
                    frame_count,
                });
                self.request_render();
            }
            Err(e) => {
                self.discarded.fetch_add(1, Ordering::SeqCst);
                self.bus.emit(SessionEvent::FrameDiscarded {
                    target,
                    reason: e.to_string(),
                });
            }
        }
    }
}

pub(crate) fn worker_loop(ctx: Arc<PipelineContext>) {
    while let Some(image) = ctx.queue.pop() {
        ctx.process_frame(image);
    }
    debug!("Worker finished");
}

/// Poll the scan folder until told to stop, feeding readable frames into the
/// queue. Blocks while the queue is full. Returns the scanner so the set of
/// already seen files survives a pause.
pub(crate) fn scan_loop(
    ctx: Arc<PipelineContext>,
    mut scanner: FolderScanner,
    stop_rx: mpsc::Receiver<()>,
    interval: Duration,
) -> FolderScanner {
    loop {
        match scanner.discover() {
            Ok(paths) => {
                for (i, path) in paths.iter().enumerate() {
                    let image = match scanner.read(path) {
                        Ok(image) => image,
                        Err(e) => {
                            ctx.bus.emit(SessionEvent::ReadFailed {
                                path: path.clone(),
                                reason: e.to_string(),
                            });
                            continue;
                        }
                    };
                    ctx.bus.emit(SessionEvent::ImageRead { path: path.clone() });
                    if ctx.queue.push(image).is_err() {
                        // Not admitted: pick these up again on the next scan.
                        for rejected in &paths[i..] {
                            scanner.forget(rejected);
                        }
                        return scanner;
                    }
                }
            }
            Err(e) => ctx.bus.emit(SessionEvent::ReadFailed {
                path: scanner.folder().to_path_buf(),
                reason: e.to_string(),
            }),
        }
        match stop_rx.recv_timeout(interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            _ => return scanner,
        }
    }
}

/// Render the stack after every update and persist the result. Bursts of
/// updates are coalesced into one rendering.
pub(crate) fn render_loop(
    shared: Arc<Shared>,
    ctx: Arc<PipelineContext>,
    rx: mpsc::Receiver<RenderSignal>,
) {
    let mut rendered_version = 0;
    loop {
        let mut shutdown = matches!(rx.recv(), Ok(RenderSignal::Shutdown) | Err(_));
        while let Ok(signal) = rx.try_recv() {
            if matches!(signal, RenderSignal::Shutdown) {
                shutdown = true;
            }
        }
        render_latest(&shared, &ctx, &mut rendered_version);
        if shutdown {
            break;
        }
    }
    debug!("Renderer finished");
}

fn render_latest(shared: &Shared, ctx: &PipelineContext, rendered_version: &mut u64) {
    let Some(snapshot) = ctx.stacker.snapshot() else {
        return;
    };
    if snapshot.version == *rendered_version {
        return;
    }
    *rendered_version = snapshot.version;

    let image = Arc::new(ctx.post().render(&snapshot, |r| ctx.report(r, RENDER_TARGET)));
    shared.set_latest(Arc::clone(&image));

    let format = ctx.output.format;
    let stack_path = ctx
        .work_folder
        .join(format!("{STACKED_IMAGE_FILE_NAME_BASE}.{}", format.extension()));
    shared.saver.submit(SaveRequest {
        image: Arc::clone(&image),
        path: stack_path,
        format,
    });

    if ctx.output.save_every_image {
        shared.saver.submit(SaveRequest {
            image: Arc::clone(&image),
            path: timestamped_path(&ctx.work_folder, format),
            format,
        });
    }

    let view = PublishedView {
        image: Arc::clone(&image),
        status: shared.status(),
    };
    if shared.publish(view) {
        shared.saver.submit(SaveRequest {
            image,
            path: web_image_path(&ctx.work_folder),
            format: OutputFormat::Jpeg,
        });
    }
}

/// `<folder>/web_image.jpg`, the file the web preview serves.
pub(crate) fn web_image_path(folder: &Path) -> PathBuf {
    folder.join(format!(
        "{WEB_SERVED_IMAGE_FILE_NAME_BASE}.{}",
        OutputFormat::Jpeg.extension()
    ))
}

/// `<folder>/stack_image-<date-time-micros>.<ext>`
pub(crate) fn timestamped_path(folder: &Path, format: OutputFormat) -> PathBuf {
    let stamp = Local::now().format("%Y-%m-%d-%H-%M-%S-%6f");
    folder.join(format!(
        "{STACKED_IMAGE_FILE_NAME_BASE}-{stamp}.{}",
        format.extension()
    ))
}
