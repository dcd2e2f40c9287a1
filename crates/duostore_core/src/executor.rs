//! The background queue: a single-worker, strict-FIFO task executor.
//!
//! The background context is moved into one named worker thread; units of
//! work reach it through an mpsc channel. One worker means no two
//! background units ever run concurrently, and channel order means units
//! run exactly in the order they were scheduled.

use crate::context::Context;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// A unit of work against the background context.
pub(crate) type Job = Box<dyn FnOnce(&mut Context) + Send + 'static>;

/// Owns the background worker thread and its submission channel.
///
/// Dropping the queue closes the channel; the worker drains the jobs
/// already scheduled, then exits, and the drop joins it.
pub(crate) struct BackgroundQueue {
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundQueue {
    /// Starts the worker thread owning the given context.
    pub(crate) fn start(mut context: Context) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();

        let worker = std::thread::Builder::new()
            .name("duostore-background".to_string())
            .spawn(move || {
                debug!("background queue started");
                while let Ok(job) = receiver.recv() {
                    job(&mut context);
                }
                debug!("background queue drained");
            })?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Schedules a unit of work; returns immediately.
    ///
    /// Units run strictly after all previously scheduled units.
    pub(crate) fn submit(&self, job: Job) {
        if let Some(sender) = &self.sender {
            if sender.send(job).is_err() {
                warn!("background queue is shut down; unit of work dropped");
            }
        }
    }
}

impl Drop for BackgroundQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish the scheduled tail.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("background worker panicked during shutdown");
            }
        }
    }
}
