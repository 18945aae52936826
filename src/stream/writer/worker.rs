//! Background writer thread
//!
//! Frames travel through a bounded channel, so a producer that outpaces
//! the disk blocks in `submit` instead of growing the queue. The first
//! write failure is latched and handed back on the producer's next call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, bounded};
use tracing::{debug, error, info, warn};

use crate::stream::common::error::{Result, StreamError};
use crate::stream::writer::sink::{PendingFrame, SegmentSink};

enum WorkerCommand {
    Append(PendingFrame),
    Checkpoint(Sender<Result<()>>),
}

type Failure = Arc<Mutex<Option<StreamError>>>;

pub(crate) struct AsyncWorker {
    sender: Option<Sender<WorkerCommand>>,
    handle: Option<JoinHandle<SegmentSink>>,
    failure: Failure,
    stopped: Arc<AtomicBool>,
}

impl AsyncWorker {
    pub(crate) fn spawn(mut sink: SegmentSink, queue_depth: usize) -> Result<Self> {
        let (sender, receiver) = bounded::<WorkerCommand>(queue_depth.max(1));
        let failure: Failure = Arc::new(Mutex::new(None));
        let latched = Arc::clone(&failure);
        let stopped = Arc::new(AtomicBool::new(false));
        let halt = Arc::clone(&stopped);

        let handle = thread::Builder::new()
            .name("stream-writer".to_string())
            .spawn(move || {
                debug!("Writer thread started");
                let mut dropped = 0usize;
                for command in receiver {
                    match command {
                        WorkerCommand::Append(_) if halt.load(Ordering::Acquire) => dropped += 1,
                        WorkerCommand::Append(frame) => {
                            if let Err(e) = sink.append(frame) {
                                error!("Background write failed: {}", e);
                                latch(&latched, e);
                                halt.store(true, Ordering::Release);
                            }
                        }
                        WorkerCommand::Checkpoint(reply) => {
                            let _ = reply.send(sink.checkpoint());
                        }
                    }
                }
                if dropped > 0 {
                    warn!("Dropped {} queued frame(s) after a write failure", dropped);
                }
                debug!("Writer thread drained its queue");
                sink
            })?;

        info!("Asynchronous writer started (queue depth {})", queue_depth);
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            failure,
            stopped,
        })
    }

    /// Oldest failure the worker reported since the last call.
    pub(crate) fn take_failure(&self) -> Option<StreamError> {
        self.failure.lock().ok().and_then(|mut slot| slot.take())
    }

    fn send(&self, command: WorkerCommand) -> Result<()> {
        let sender = self.sender.as_ref().ok_or(StreamError::SessionClosed)?;
        sender
            .send(command)
            .map_err(|_| StreamError::WorkerFailed("writer thread exited".to_string()))
    }

    /// The latched failure, or a generic one once it has been reported.
    fn check(&self) -> Result<()> {
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        if self.stopped.load(Ordering::Acquire) {
            return Err(StreamError::WorkerFailed(
                "writer stopped after an earlier write failure".to_string(),
            ));
        }
        Ok(())
    }

    /// Queues a frame, blocking while the queue is full.
    pub(crate) fn submit(&self, frame: PendingFrame) -> Result<()> {
        self.check()?;
        self.send(WorkerCommand::Append(frame))
    }

    /// Waits until every queued frame is on disk, then checkpoints.
    pub(crate) fn checkpoint(&self) -> Result<()> {
        let (reply, done) = bounded(1);
        self.send(WorkerCommand::Checkpoint(reply))?;
        let result = done
            .recv()
            .map_err(|_| StreamError::WorkerFailed("writer thread exited".to_string()))?;
        self.check()?;
        result
    }

    /// Drains the queue and hands the sink back, along with any failure
    /// not yet reported.
    pub(crate) fn join(mut self) -> Result<(SegmentSink, Option<StreamError>)> {
        drop(self.sender.take());
        let handle = self
            .handle
            .take()
            .ok_or_else(|| StreamError::WorkerFailed("writer thread already joined".to_string()))?;
        let sink = handle
            .join()
            .map_err(|_| StreamError::WorkerFailed("writer thread panicked".to_string()))?;
        info!("Asynchronous writer stopped");
        Ok((sink, self.take_failure()))
    }
}

fn latch(failure: &Failure, e: StreamError) {
    if let Ok(mut slot) = failure.lock() {
        if slot.is_none() {
            *slot = Some(e);
        }
    }
}
