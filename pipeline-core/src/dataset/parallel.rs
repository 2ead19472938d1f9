// pipeline-core/src/dataset/parallel.rs

//! Order-preserving parallel execution for decode and map stages.
//!
//! Inputs are pulled from upstream and handed to a fixed pool of worker
//! threads over a shared job channel. Every job carries its own one-slot
//! reply channel; replies are consumed in submission order, so output order
//! matches input order regardless of which worker finishes first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::warn;

use super::stream::{ElementStream, Pull};
use crate::error::{PipelineError, Result};
use crate::record::Element;

/// Function applied to every input by a parallel stage.
pub(crate) type WorkFn<I> = Arc<dyn Fn(I) -> Result<Element> + Send + Sync>;

struct Job<I> {
    input: I,
    reply: Sender<Result<Element>>,
}

enum Slot {
    Waiting(Receiver<Result<Element>>),
    /// An upstream error, reported once the results before it are consumed.
    Failed(PipelineError),
}

/// Applies a function to every upstream input on up to `parallelism`
/// workers, yielding results in input order.
pub(crate) struct OrderedMap<I, S> {
    stage: &'static str,
    source: S,
    func: WorkFn<I>,
    jobs: Option<Sender<Job<I>>>,
    workers: Vec<JoinHandle<()>>,
    pending: VecDeque<Slot>,
    max_in_flight: usize,
    source_done: bool,
    cancelled: Arc<AtomicBool>,
}

impl<I, S> OrderedMap<I, S>
where
    I: Send + 'static,
    S: Pull<I>,
{
    /// Creates the stage. With `parallelism <= 1` no threads are spawned and
    /// the function runs inline on the pulling thread.
    pub fn new(stage: &'static str, source: S, func: WorkFn<I>, parallelism: usize) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::new();
        let mut jobs = None;

        if parallelism > 1 {
            let (job_tx, job_rx) = channel::unbounded::<Job<I>>();
            for _ in 0..parallelism {
                let job_rx = job_rx.clone();
                let func = func.clone();
                let cancelled = cancelled.clone();
                workers.push(thread::spawn(move || worker_loop(job_rx, func, cancelled)));
            }
            jobs = Some(job_tx);
        }

        Self {
            stage,
            source,
            func,
            jobs,
            workers,
            pending: VecDeque::new(),
            max_in_flight: parallelism.max(1) * 2,
            source_done: false,
            cancelled,
        }
    }

    /// Keeps up to `max_in_flight` jobs submitted.
    fn submit(&mut self) -> Result<()> {
        let Some(jobs) = &self.jobs else {
            return Ok(());
        };
        while !self.source_done && self.pending.len() < self.max_in_flight {
            match self.source.pull() {
                Ok(Some(input)) => {
                    let (reply, result) = channel::bounded(1);
                    jobs.send(Job { input, reply })
                        .map_err(|_| PipelineError::worker_panicked(self.stage))?;
                    self.pending.push_back(Slot::Waiting(result));
                }
                Ok(None) => self.source_done = true,
                Err(e) => {
                    self.source_done = true;
                    self.pending.push_back(Slot::Failed(e));
                }
            }
        }
        Ok(())
    }
}

fn worker_loop<I>(jobs: Receiver<Job<I>>, func: WorkFn<I>, cancelled: Arc<AtomicBool>) {
    while let Ok(job) = jobs.recv() {
        if cancelled.load(Ordering::Relaxed) {
            break;
        }
        // The consumer may be gone; nothing to do with the result then.
        let _ = job.reply.send(func(job.input));
    }
}

impl<I, S> ElementStream for OrderedMap<I, S>
where
    I: Send + 'static,
    S: Pull<I>,
{
    fn next(&mut self) -> Result<Option<Element>> {
        if self.jobs.is_none() {
            return match self.source.pull()? {
                Some(input) => (self.func)(input).map(Some),
                None => Ok(None),
            };
        }

        self.submit()?;
        match self.pending.pop_front() {
            None => Ok(None),
            Some(Slot::Failed(e)) => Err(e),
            Some(Slot::Waiting(result)) => match result.recv() {
                Ok(result) => result.map(Some),
                Err(_) => {
                    warn!(stage = self.stage, "worker dropped a job without replying");
                    Err(PipelineError::worker_panicked(self.stage))
                }
            },
        }
    }
}

impl<I, S> Drop for OrderedMap<I, S> {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Relaxed);
        // Closing the job channel ends the worker loops.
        self.jobs.take();
        self.pending.clear();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!(stage = self.stage, "worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::stream::{BoxStream, VecStream};
    use crate::record::{Record, ScalarType, Schema, Value};
    use std::time::Duration;

    fn ints(n: i64) -> (Arc<Schema>, BoxStream) {
        let schema = Arc::new(Schema::scalars(&[("value", ScalarType::Integer)]).unwrap());
        let items = (0..n)
            .map(|i| Element::Record(Record::new(schema.clone(), vec![Value::Int(i)]).unwrap()))
            .collect();
        (schema, Box::new(VecStream::new(items)))
    }

    fn value(element: &Element) -> i64 {
        element.as_record().unwrap().values()[0].as_i64().unwrap()
    }

    fn slow_double(schema: Arc<Schema>) -> WorkFn<Element> {
        Arc::new(move |element: Element| {
            let v = value(&element);
            // Later inputs finish first
            thread::sleep(Duration::from_millis((10 - v % 10) as u64));
            Ok(Element::Record(Record::new(schema.clone(), vec![Value::Int(v * 2)])?))
        })
    }

    fn drain(stream: &mut dyn ElementStream) -> Result<Vec<i64>> {
        let mut out = Vec::new();
        while let Some(element) = stream.next()? {
            out.push(value(&element));
        }
        Ok(out)
    }

    #[test]
    fn test_parallel_matches_sequential_order() {
        let (schema, source) = ints(40);
        let mut sequential = OrderedMap::new("map", source, slow_double(schema.clone()), 1);
        let (_, source) = ints(40);
        let mut parallel = OrderedMap::new("map", source, slow_double(schema), 4);

        let expected: Vec<i64> = (0..40).map(|v| v * 2).collect();
        assert_eq!(drain(&mut sequential).unwrap(), expected);
        assert_eq!(drain(&mut parallel).unwrap(), expected);
    }

    #[test]
    fn test_error_surfaces_in_order() {
        let (_, source) = ints(10);
        let func: WorkFn<Element> = Arc::new(|element: Element| {
            if value(&element) == 5 {
                Err(PipelineError::transform("bad record"))
            } else {
                Ok(element)
            }
        });
        let mut stage = OrderedMap::new("map", source, func, 3);

        for expected in 0..5 {
            assert_eq!(value(&stage.next().unwrap().unwrap()), expected);
        }
        assert!(matches!(stage.next(), Err(PipelineError::Transform { .. })));
    }

    #[test]
    fn test_panicking_worker_reports_stage() {
        let (_, source) = ints(4);
        let func: WorkFn<Element> = Arc::new(|element: Element| {
            if value(&element) == 0 {
                panic!("boom");
            }
            Ok(element)
        });
        let mut stage = OrderedMap::new("decode", source, func, 2);
        match stage.next() {
            Err(PipelineError::WorkerPanicked { stage }) => assert_eq!(stage, "decode"),
            other => panic!("expected worker panic, got {other:?}"),
        }
    }

    #[test]
    fn test_drop_with_pending_jobs_returns() {
        let (schema, source) = ints(100);
        let mut stage = OrderedMap::new("map", source, slow_double(schema), 4);
        assert!(stage.next().unwrap().is_some());
        drop(stage);
    }
}
