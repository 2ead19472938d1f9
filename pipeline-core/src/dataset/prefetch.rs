// pipeline-core/src/dataset/prefetch.rs

//! Background prefetching.
//!
//! A producer thread drives the upstream stream and pushes results into a
//! bounded channel; the consumer pulls from the channel. The producer blocks
//! while the channel is full and the consumer blocks while it is empty.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};
use tracing::warn;

use super::stream::{BoxStream, ElementStream, IterContext};
use super::{Dataset, Operator};
use crate::error::{PipelineError, Result};
use crate::record::Element;

/// Result type for prefetched items.
type PrefetchItem = Result<Element>;

/// A stream whose upstream runs ahead on a background thread.
pub(crate) struct PrefetchStream {
    /// Receiving side of the bounded queue.
    receiver: Option<Receiver<PrefetchItem>>,
    /// Flag to signal the producer thread to stop.
    stop_flag: Arc<AtomicBool>,
    /// Handle to the producer thread.
    producer: Option<JoinHandle<()>>,
}

impl PrefetchStream {
    /// Starts prefetching up to `buffer_size` elements from `upstream`.
    pub fn spawn(mut upstream: BoxStream, buffer_size: usize) -> Self {
        let (sender, receiver) = channel::bounded(buffer_size.max(1));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop = stop_flag.clone();

        let producer = thread::spawn(move || loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            match upstream.next() {
                Ok(Some(element)) => {
                    // Blocks while the queue is full; fails once the consumer is gone.
                    if sender.send(Ok(element)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = sender.send(Err(e));
                    break;
                }
            }
        });

        Self {
            receiver: Some(receiver),
            stop_flag,
            producer: Some(producer),
        }
    }

    /// Stops the producer thread and waits for it to exit.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.receiver.take();
        if let Some(producer) = self.producer.take() {
            if producer.join().is_err() {
                warn!("prefetch producer panicked");
            }
        }
    }

    /// Number of elements currently waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.receiver.as_ref().map_or(0, Receiver::len)
    }
}

impl ElementStream for PrefetchStream {
    fn next(&mut self) -> Result<Option<Element>> {
        let Some(receiver) = &self.receiver else {
            return Ok(None);
        };
        match receiver.recv() {
            Ok(item) => item.map(Some),
            Err(_) => {
                // Producer finished (or died) and the queue is drained.
                self.receiver = None;
                match self.producer.take().map(JoinHandle::join) {
                    Some(Err(_)) => {
                        warn!("prefetch producer panicked");
                        Err(PipelineError::worker_panicked("prefetch"))
                    }
                    _ => Ok(None),
                }
            }
        }
    }
}

impl Drop for PrefetchStream {
    fn drop(&mut self) {
        self.stop();
    }
}

pub(crate) struct PrefetchOp {
    pub buffer_size: usize,
}

impl Operator for PrefetchOp {
    fn describe(&self) -> String {
        format!("prefetch({})", self.buffer_size)
    }

    fn open(&self, inputs: &[Dataset], ctx: &IterContext) -> Result<BoxStream> {
        let upstream = inputs[0].open(ctx)?;
        if self.buffer_size == 0 {
            // Prefetching disabled, use direct iteration
            return Ok(upstream);
        }
        Ok(Box::new(PrefetchStream::spawn(upstream, self.buffer_size)))
    }
}
