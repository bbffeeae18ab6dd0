//! Image Saver: writes rendered results on a dedicated thread.

use std::path::PathBuf;
use std::sync::{mpsc, Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

use super::events::{EventBus, SessionEvent};
use crate::error::{LiveStackError, Result};
use crate::frame::Image;
use crate::io::{save_image, OutputFormat};

#[derive(Clone, Debug)]
pub struct SaveRequest {
    pub image: Arc<Image>,
    pub path: PathBuf,
    pub format: OutputFormat,
}

#[derive(Debug, Default)]
struct Pending {
    count: Mutex<usize>,
    drained: Condvar,
}

impl Pending {
    fn add(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    fn get(&self) -> usize {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_drained(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            count = self
                .drained
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Save queue served by one thread. Failures become events, never errors.
#[derive(Debug)]
pub struct ImageSaver {
    tx: Option<mpsc::Sender<SaveRequest>>,
    pending: Arc<Pending>,
    handle: Option<JoinHandle<()>>,
}

impl ImageSaver {
    pub fn spawn(bus: Arc<EventBus>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<SaveRequest>();
        let pending = Arc::new(Pending::default());
        let handle = {
            let pending = Arc::clone(&pending);
            std::thread::Builder::new()
                .name("livestack-saver".into())
                .spawn(move || {
                    while let Ok(request) = rx.recv() {
                        write(&bus, &request);
                        pending.done();
                    }
                })
                .map_err(|e| LiveStackError::Allocation(format!("image saver thread: {e}")))?
        };
        Ok(Self {
            tx: Some(tx),
            pending,
            handle: Some(handle),
        })
    }

    /// Queue a save. Returns `false` once the saver has shut down.
    pub fn submit(&self, request: SaveRequest) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        self.pending.add();
        if tx.send(request).is_err() {
            self.pending.done();
            return false;
        }
        true
    }

    /// Saves queued and not yet written.
    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    /// Block until every queued save has been written or has failed.
    pub fn flush(&self) {
        self.pending.wait_drained();
    }

    /// Write everything still queued, then stop the thread.
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ImageSaver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn write(bus: &EventBus, request: &SaveRequest) {
    match save_image(&request.image, &request.path, request.format) {
        Ok(()) => bus.emit(SessionEvent::ImageSaved {
            path: request.path.clone(),
        }),
        Err(e) => bus.emit(SessionEvent::SaveFailed {
            path: request.path.clone(),
            reason: e.to_string(),
        }),
    }
}
