//! Read-ahead for asynchronous readers
//!
//! A worker thread with its own file handles keeps the frames
//! `[target, target + depth)` decoded in a shared buffer. The reader
//! retargets it after every read or seek and falls back to a direct read
//! whenever the frame it needs has not landed yet.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use tracing::debug;

use crate::stream::common::error::Result;
use crate::stream::reader::catalog::{Position, SegmentCatalog, SegmentFiles};
use crate::stream::record::ImageRecord;

type Buffer = Arc<Mutex<BTreeMap<u32, (ImageRecord, Position)>>>;

enum PrefetchCommand {
    Fill { from: Position },
}

pub(crate) struct Prefetcher {
    sender: Option<Sender<PrefetchCommand>>,
    handle: Option<JoinHandle<()>>,
    buffer: Buffer,
}

impl Prefetcher {
    pub(crate) fn spawn(catalog: Arc<SegmentCatalog>, depth: usize) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let buffer: Buffer = Arc::new(Mutex::new(BTreeMap::new()));
        let shared = Arc::clone(&buffer);
        let handle = thread::Builder::new()
            .name("stream-prefetch".to_string())
            .spawn(move || run(SegmentFiles::new(catalog), receiver, shared, depth.max(1) as u32))?;
        debug!("Prefetcher started (depth {})", depth);
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            buffer,
        })
    }

    /// Points the read-ahead window at `from`.
    pub(crate) fn retarget(&self, from: Position) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(PrefetchCommand::Fill { from });
        }
    }

    /// Takes `ordinal` out of the buffer if it has been read ahead.
    pub(crate) fn take(&self, ordinal: u32) -> Option<(ImageRecord, Position)> {
        self.buffer.lock().ok()?.remove(&ordinal)
    }

    pub(crate) fn stop(&mut self) {
        drop(self.sender.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            debug!("Prefetcher stopped");
        }
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(mut files: SegmentFiles, receiver: Receiver<PrefetchCommand>, buffer: Buffer, depth: u32) {
    let frame_count = files.catalog().frame_count();
    // Next position to read and the end of the window.
    let mut plan: Option<(Position, u32)> = None;
    loop {
        let command = if plan.is_some() {
            match receiver.try_recv() {
                Ok(command) => Some(command),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match receiver.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            }
        };

        if let Some(PrefetchCommand::Fill { from }) = command {
            let end = from.ordinal.saturating_add(depth);
            if let Ok(mut buffered) = buffer.lock() {
                buffered.retain(|&ordinal, _| ordinal >= from.ordinal && ordinal < end);
            }
            plan = Some((from, end));
            continue;
        }

        let Some((pos, end)) = plan else {
            continue;
        };
        if pos.ordinal >= end || pos.ordinal >= frame_count {
            plan = None;
            continue;
        }
        let already = buffer
            .lock()
            .ok()
            .and_then(|buffered| buffered.get(&pos.ordinal).map(|(_, next)| *next));
        let next = match already {
            Some(next) => next,
            None => match files.read_at(pos) {
                Ok((record, next)) => {
                    if let Ok(mut buffered) = buffer.lock() {
                        buffered.insert(pos.ordinal, (record, next));
                    }
                    next
                }
                Err(e) => {
                    // The reader's direct read reports the error.
                    debug!("Prefetch of frame {} failed: {}", pos.ordinal, e);
                    plan = None;
                    continue;
                }
            },
        };
        plan = Some((next, end));
    }
}
