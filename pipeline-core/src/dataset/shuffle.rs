// pipeline-core/src/dataset/shuffle.rs

//! Bounded-memory reservoir shuffling.
//!
//! The buffer fills from upstream, then every pull yields a uniformly chosen
//! buffered element and puts the next upstream element in its place. Once
//! upstream is exhausted the buffer drains in random order.
//!
//! Seeding per repetition pass:
//! - seed, reshuffling: each pass is seeded with xxHash64(seed, pass)
//! - seed, no reshuffling: every pass is seeded with the seed itself
//! - no seed, reshuffling: each pass draws fresh OS entropy
//! - no seed, no reshuffling: one seed per iterator, shared by all passes

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::stream::{mix, BoxStream, ElementStream, IterContext};
use super::{Dataset, Operator};
use crate::config::ShuffleConfig;
use crate::error::{PipelineError, Result};
use crate::record::Element;

/// Upper bound on the buffer's initial allocation; it grows as it fills.
const MAX_PREALLOC: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Filling,
    Steady,
    Draining,
}

pub(crate) struct ShuffleStream {
    upstream: BoxStream,
    buffer: Vec<Element>,
    capacity: usize,
    rng: StdRng,
    state: State,
}

impl ShuffleStream {
    pub fn new(upstream: BoxStream, capacity: usize, rng: StdRng) -> Self {
        Self {
            upstream,
            buffer: Vec::with_capacity(capacity.min(MAX_PREALLOC)),
            capacity,
            rng,
            state: State::Filling,
        }
    }

    fn fill(&mut self) -> Result<()> {
        while self.buffer.len() < self.capacity {
            match self.upstream.next()? {
                Some(element) => self.buffer.push(element),
                None => {
                    self.state = State::Draining;
                    return Ok(());
                }
            }
        }
        self.state = State::Steady;
        Ok(())
    }
}

impl ElementStream for ShuffleStream {
    fn next(&mut self) -> Result<Option<Element>> {
        if self.state == State::Filling {
            self.fill()?;
        }
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let idx = self.rng.random_range(0..self.buffer.len());
        if self.state == State::Steady {
            match self.upstream.next()? {
                Some(incoming) => {
                    return Ok(Some(std::mem::replace(&mut self.buffer[idx], incoming)));
                }
                None => self.state = State::Draining,
            }
        }
        Ok(Some(self.buffer.swap_remove(idx)))
    }
}

pub(crate) struct ShuffleOp {
    id: usize,
    buffer_size: usize,
    options: ShuffleConfig,
}

impl ShuffleOp {
    pub fn new(id: usize, buffer_size: usize, options: ShuffleConfig) -> Result<Self> {
        if buffer_size == 0 {
            return Err(PipelineError::config("shuffle buffer_size must be > 0"));
        }
        Ok(Self {
            id,
            buffer_size,
            options,
        })
    }

    fn rng_for(&self, ctx: &IterContext) -> StdRng {
        match (self.options.seed, self.options.reshuffle_each_iteration) {
            (Some(seed), true) => StdRng::seed_from_u64(mix(seed, ctx.pass)),
            (Some(seed), false) => StdRng::seed_from_u64(seed),
            (None, true) => StdRng::from_os_rng(),
            (None, false) => StdRng::seed_from_u64(mix(ctx.iterator_seed, self.id as u64)),
        }
    }
}

impl Operator for ShuffleOp {
    fn describe(&self) -> String {
        match self.options.seed {
            Some(seed) => format!("shuffle(buffer={}, seed={seed})", self.buffer_size),
            None => format!("shuffle(buffer={})", self.buffer_size),
        }
    }

    fn open(&self, inputs: &[Dataset], ctx: &IterContext) -> Result<BoxStream> {
        debug!(pass = ctx.pass, buffer = self.buffer_size, "opening shuffle buffer");
        Ok(Box::new(ShuffleStream::new(
            inputs[0].open(ctx)?,
            self.buffer_size,
            self.rng_for(ctx),
        )))
    }
}
