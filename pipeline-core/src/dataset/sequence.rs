// pipeline-core/src/dataset/sequence.rs

//! Stages that select or combine whole elements without looking inside them.

use super::sharding::in_shard;
use super::stream::{BoxStream, ElementStream, IterContext};
use super::{Dataset, Operator};
use crate::error::Result;
use crate::record::Element;

pub(crate) struct TakeOp {
    pub count: u64,
}

struct TakeStream {
    upstream: BoxStream,
    remaining: u64,
}

impl ElementStream for TakeStream {
    fn next(&mut self) -> Result<Option<Element>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let element = self.upstream.next()?;
        if element.is_some() {
            self.remaining -= 1;
        } else {
            self.remaining = 0;
        }
        Ok(element)
    }
}

impl Operator for TakeOp {
    fn describe(&self) -> String {
        format!("take({})", self.count)
    }

    fn open(&self, inputs: &[Dataset], ctx: &IterContext) -> Result<BoxStream> {
        Ok(Box::new(TakeStream {
            upstream: inputs[0].open(ctx)?,
            remaining: self.count,
        }))
    }
}

pub(crate) struct SkipOp {
    pub count: u64,
}

struct SkipStream {
    upstream: BoxStream,
    to_skip: u64,
}

impl ElementStream for SkipStream {
    fn next(&mut self) -> Result<Option<Element>> {
        while self.to_skip > 0 {
            if self.upstream.next()?.is_none() {
                self.to_skip = 0;
                return Ok(None);
            }
            self.to_skip -= 1;
        }
        self.upstream.next()
    }
}

impl Operator for SkipOp {
    fn describe(&self) -> String {
        format!("skip({})", self.count)
    }

    fn open(&self, inputs: &[Dataset], ctx: &IterContext) -> Result<BoxStream> {
        Ok(Box::new(SkipStream {
            upstream: inputs[0].open(ctx)?,
            to_skip: self.count,
        }))
    }
}

/// Keeps every `num_shards`-th element starting at `shard_index`.
pub(crate) struct ShardOp {
    pub num_shards: usize,
    pub shard_index: usize,
}

struct ShardStream {
    upstream: BoxStream,
    num_shards: usize,
    shard_index: usize,
    position: usize,
}

impl ElementStream for ShardStream {
    fn next(&mut self) -> Result<Option<Element>> {
        while let Some(element) = self.upstream.next()? {
            let position = self.position;
            self.position = self.position.wrapping_add(1);
            if in_shard(position, self.num_shards, self.shard_index) {
                return Ok(Some(element));
            }
        }
        Ok(None)
    }
}

impl Operator for ShardOp {
    fn describe(&self) -> String {
        format!("shard({}/{})", self.shard_index, self.num_shards)
    }

    fn open(&self, inputs: &[Dataset], ctx: &IterContext) -> Result<BoxStream> {
        Ok(Box::new(ShardStream {
            upstream: inputs[0].open(ctx)?,
            num_shards: self.num_shards,
            shard_index: self.shard_index,
            position: 0,
        }))
    }
}

/// Yields all of the first input, then all of the second.
pub(crate) struct ConcatenateOp;

struct ConcatenateStream {
    inputs: Vec<Dataset>,
    ctx: IterContext,
    next_input: usize,
    current: Option<BoxStream>,
}

impl ElementStream for ConcatenateStream {
    fn next(&mut self) -> Result<Option<Element>> {
        loop {
            if self.current.is_none() {
                let Some(input) = self.inputs.get(self.next_input) else {
                    return Ok(None);
                };
                self.current = Some(input.open(&self.ctx)?);
                self.next_input += 1;
            }
            if let Some(stream) = self.current.as_mut() {
                if let Some(element) = stream.next()? {
                    return Ok(Some(element));
                }
            }
            // Release the finished input before opening the next.
            self.current = None;
        }
    }
}

impl Operator for ConcatenateOp {
    fn describe(&self) -> String {
        "concatenate".to_string()
    }

    fn open(&self, inputs: &[Dataset], ctx: &IterContext) -> Result<BoxStream> {
        Ok(Box::new(ConcatenateStream {
            inputs: inputs.to_vec(),
            ctx: *ctx,
            next_input: 0,
            current: None,
        }))
    }
}
