// pipeline-core/src/dataset/stream.rs

//! Runtime side of a pipeline: every dataset node opens into a pull-based
//! stream that owns its mutable state.

use std::hash::Hasher;

use twox_hash::XxHash64;

use crate::error::Result;
use crate::record::Element;

/// A pull-based sequence of elements; `Ok(None)` signals end-of-data.
pub(crate) trait ElementStream: Send {
    fn next(&mut self) -> Result<Option<Element>>;
}

pub(crate) type BoxStream = Box<dyn ElementStream>;

/// Generic pull interface used by the worker pool, which consumes either
/// elements or raw record payloads.
pub(crate) trait Pull<T>: Send {
    fn pull(&mut self) -> Result<Option<T>>;
}

impl Pull<Element> for BoxStream {
    fn pull(&mut self) -> Result<Option<Element>> {
        ElementStream::next(self.as_mut())
    }
}

/// Per-iterator state handed down when a dataset graph is opened.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IterContext {
    /// Repetition index; 0 outside any repeat.
    pub pass: u64,
    /// Seed drawn once per iterator; used by unseeded shuffles that keep
    /// the same order across passes.
    pub iterator_seed: u64,
}

impl IterContext {
    pub fn new(iterator_seed: u64) -> Self {
        Self {
            pass: 0,
            iterator_seed,
        }
    }

    /// Context for repetition `pass` of a repeat nested in this context.
    pub fn for_pass(&self, pass: u64) -> Self {
        let pass = if self.pass == 0 {
            pass
        } else {
            mix(self.pass, pass)
        };
        Self { pass, ..*self }
    }
}

/// Derives a 64-bit value from `seed` and `salt`.
pub(crate) fn mix(seed: u64, salt: u64) -> u64 {
    let mut hasher = XxHash64::with_seed(seed);
    hasher.write_u64(salt);
    hasher.finish()
}

/// A stream over an in-memory vector.
pub(crate) struct VecStream {
    items: std::vec::IntoIter<Element>,
}

impl VecStream {
    pub fn new(items: Vec<Element>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }
}

impl ElementStream for VecStream {
    fn next(&mut self) -> Result<Option<Element>> {
        Ok(self.items.next())
    }
}
