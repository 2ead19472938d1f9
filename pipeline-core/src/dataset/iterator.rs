// pipeline-core/src/dataset/iterator.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::stream::{BoxStream, ElementStream, IterContext};
use super::Dataset;
use crate::error::{PipelineError, Result};
use crate::record::Batch;

enum State {
    /// Opened lazily on the first pull.
    Ready(Option<BoxStream>),
    Exhausted,
    Failed(PipelineError),
}

/// The consumer handle of a dataset graph.
///
/// Pulls are serialized: concurrent callers of [`next_batch`](Self::next_batch)
/// take turns. End-of-data is reported once as `Ok(None)`; later pulls fail
/// with `IterationExhausted` until [`reset`](Self::reset). An error is
/// terminal and is reported again on every later pull.
///
/// Dropping the iterator stops all of its background workers.
pub struct PipelineIterator {
    dataset: Dataset,
    seed: u64,
    state: Mutex<State>,
    error_reported: AtomicBool,
}

impl PipelineIterator {
    pub(crate) fn new(dataset: Dataset) -> Self {
        let seed = rand::random();
        info!(dataset = dataset.id(), spec = %dataset.element_spec(), "creating pipeline iterator");
        Self {
            dataset,
            seed,
            state: Mutex::new(State::Ready(None)),
            error_reported: AtomicBool::new(false),
        }
    }

    /// Pulls the next element (a batch, if the graph batches).
    ///
    /// # Errors
    ///
    /// Returns the error that terminated iteration, or `IterationExhausted`
    /// after end-of-data was already reported.
    pub fn next_batch(&self) -> Result<Option<Batch>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| PipelineError::worker_panicked("iterator"))?;

        let outcome = self.pull(&mut state);
        match &outcome {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(dataset = self.dataset.id(), "end of data");
                *state = State::Exhausted;
            }
            Err(err) if matches!(*state, State::Ready(_)) => {
                warn!(dataset = self.dataset.id(), error = %err, "iteration failed");
                *state = State::Failed(err.clone());
            }
            Err(_) => {}
        }
        outcome
    }

    fn pull(&self, state: &mut State) -> Result<Option<Batch>> {
        let stream = match state {
            State::Ready(stream) => stream,
            State::Exhausted => return Err(PipelineError::IterationExhausted),
            State::Failed(err) => return Err(err.clone()),
        };
        if stream.is_none() {
            *stream = Some(self.dataset.open(&IterContext::new(self.seed))?);
        }
        match stream.as_mut() {
            Some(stream) => stream.next(),
            None => Ok(None),
        }
    }

    /// Rewinds to the start of the graph, dropping all run-time state.
    pub fn reset(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| PipelineError::worker_panicked("iterator"))?;
        *state = State::Ready(None);
        self.error_reported.store(false, Ordering::Relaxed);
        debug!(dataset = self.dataset.id(), "iterator reset");
        Ok(())
    }

    /// Whether end-of-data has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.state
            .lock()
            .map(|state| matches!(*state, State::Exhausted))
            .unwrap_or(false)
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }
}

/// Yields `Ok` elements until end-of-data. A terminal error is yielded once,
/// after which the iterator ends.
impl Iterator for PipelineIterator {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) | Err(PipelineError::IterationExhausted) => None,
            Err(err) => {
                if self.error_reported.swap(true, Ordering::Relaxed) {
                    None
                } else {
                    Some(Err(err))
                }
            }
        }
    }
}

#[derive(Debug)]
enum AsyncState {
    Active,
    Exhausted,
    Failed(PipelineError),
}

/// Async consumer handle.
///
/// The graph is driven by a [`PipelineIterator`] on the tokio blocking pool;
/// elements arrive over a bounded channel, so the producer runs at most
/// `buffer` elements ahead. Dropping the handle closes the channel and the
/// producer stops at its next send.
#[derive(Debug)]
pub struct AsyncPipelineIterator {
    receiver: mpsc::Receiver<Result<Batch>>,
    producer: Option<JoinHandle<()>>,
    state: AsyncState,
}

impl AsyncPipelineIterator {
    pub(crate) fn new(dataset: Dataset, buffer: usize) -> Result<Self> {
        if buffer == 0 {
            return Err(PipelineError::config("async iterator buffer must be > 0"));
        }
        let handle = Handle::try_current().map_err(|e| {
            PipelineError::config_with_source("async iteration requires a tokio runtime", e)
        })?;

        let (sender, receiver) = mpsc::channel(buffer);
        let iterator = PipelineIterator::new(dataset);
        let producer = handle.spawn_blocking(move || loop {
            let item = match iterator.next_batch() {
                Ok(Some(batch)) => Ok(batch),
                Ok(None) => break,
                Err(err) => Err(err),
            };
            let failed = item.is_err();
            if sender.blocking_send(item).is_err() {
                debug!("async iterator dropped; stopping producer");
                break;
            }
            if failed {
                break;
            }
        });

        Ok(Self {
            receiver,
            producer: Some(producer),
            state: AsyncState::Active,
        })
    }

    /// Awaits the next element, with the same end-of-data and error
    /// semantics as [`PipelineIterator::next_batch`].
    pub async fn next_batch(&mut self) -> Result<Option<Batch>> {
        match &self.state {
            AsyncState::Active => {}
            AsyncState::Exhausted => return Err(PipelineError::IterationExhausted),
            AsyncState::Failed(err) => return Err(err.clone()),
        }

        match self.receiver.recv().await {
            Some(Ok(batch)) => Ok(Some(batch)),
            Some(Err(err)) => {
                self.state = AsyncState::Failed(err.clone());
                Err(err)
            }
            None => {
                if let Some(producer) = self.producer.take() {
                    if let Err(join_err) = producer.await {
                        if join_err.is_panic() {
                            warn!("async iterator producer panicked");
                            let err = PipelineError::worker_panicked("async_iterator");
                            self.state = AsyncState::Failed(err.clone());
                            return Err(err);
                        }
                    }
                }
                self.state = AsyncState::Exhausted;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Element, Record, Value};
    use std::sync::Arc;

    fn values(batch: &Batch) -> Vec<i64> {
        batch
            .as_record()
            .unwrap()
            .get("value")
            .unwrap()
            .as_list()
            .unwrap()
            .iter()
            .map(|v| v.as_i64().unwrap())
            .collect()
    }

    fn failing_at(n: i64) -> Dataset {
        Dataset::range(0, 10)
            .map_records("fail", move |record: Record| {
                if record.get("value").and_then(Value::as_i64) == Some(n) {
                    return Err(PipelineError::decode(b"3", Some(0), "bad record"));
                }
                Ok(record)
            })
            .unwrap()
    }

    #[test]
    fn test_end_of_data_then_exhausted() {
        let iterator = Dataset::range(0, 4).batch(2, false).unwrap().iter();
        assert_eq!(values(&iterator.next_batch().unwrap().unwrap()), vec![0, 1]);
        assert_eq!(values(&iterator.next_batch().unwrap().unwrap()), vec![2, 3]);
        assert!(iterator.next_batch().unwrap().is_none());
        assert!(iterator.is_exhausted());
        assert!(matches!(
            iterator.next_batch(),
            Err(PipelineError::IterationExhausted)
        ));
    }

    #[test]
    fn test_reset_restarts() {
        let iterator = Dataset::range(0, 3).iter();
        while iterator.next_batch().unwrap().is_some() {}
        iterator.reset().unwrap();
        assert!(!iterator.is_exhausted());
        let first = iterator.next_batch().unwrap().unwrap();
        assert_eq!(first.as_record().unwrap().get("value"), Some(&Value::Int(0)));
    }

    #[test]
    fn test_error_is_durable() {
        let iterator = failing_at(2).iter();
        assert!(iterator.next_batch().unwrap().is_some());
        assert!(iterator.next_batch().unwrap().is_some());
        for _ in 0..3 {
            match iterator.next_batch() {
                Err(PipelineError::Decode { field_index, .. }) => assert_eq!(field_index, Some(0)),
                other => panic!("expected decode error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_iterator_trait_reports_error_once() {
        let items: Vec<_> = failing_at(1).iter().collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());

        let ok: Vec<_> = Dataset::range(0, 5).iter().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(ok.len(), 5);
    }

    #[test]
    fn test_concurrent_pulls_are_serialized() {
        let iterator = Arc::new(Dataset::range(0, 400).prefetch(4).iter());
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let iterator = iterator.clone();
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Ok(Some(element)) = iterator.next_batch() {
                        seen.push(element);
                    }
                    seen
                })
            })
            .collect();

        let mut all: Vec<i64> = workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .map(|e: Element| e.as_record().unwrap().get("value").unwrap().as_i64().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..400).collect::<Vec<_>>());
    }

    #[test]
    fn test_async_requires_runtime() {
        let err = Dataset::range(0, 3).iter_async(2).unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }));
    }

    #[tokio::test]
    async fn test_async_iteration() {
        let mut iterator = Dataset::range(0, 10).batch(4, false).unwrap().iter_async(2).unwrap();
        let mut sizes = Vec::new();
        while let Some(batch) = iterator.next_batch().await.unwrap() {
            sizes.push(batch.batch_len().unwrap());
        }
        assert_eq!(sizes, vec![4, 4, 2]);
        assert!(matches!(
            iterator.next_batch().await,
            Err(PipelineError::IterationExhausted)
        ));
    }

    #[tokio::test]
    async fn test_async_error_is_durable() {
        let mut iterator = failing_at(0).iter_async(1).unwrap();
        assert!(matches!(iterator.next_batch().await, Err(PipelineError::Decode { .. })));
        assert!(matches!(iterator.next_batch().await, Err(PipelineError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_async_drop_stops_producer() {
        let mut iterator = Dataset::range(0, 10).repeat(None).unwrap().iter_async(1).unwrap();
        assert!(iterator.next_batch().await.unwrap().is_some());
        drop(iterator);
    }
}
