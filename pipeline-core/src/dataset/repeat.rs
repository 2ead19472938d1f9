// pipeline-core/src/dataset/repeat.rs

use tracing::debug;

use super::stream::{BoxStream, ElementStream, IterContext};
use super::{Dataset, Operator};
use crate::error::{PipelineError, Result};
use crate::record::Element;

/// Re-drives the upstream graph from its source `count` times, or forever.
pub(crate) struct RepeatOp {
    count: Option<u64>,
}

impl RepeatOp {
    pub fn new(count: Option<u64>) -> Result<Self> {
        if count == Some(0) {
            return Err(PipelineError::config("repeat count must be > 0"));
        }
        Ok(Self { count })
    }
}

struct RepeatStream {
    upstream: Dataset,
    ctx: IterContext,
    count: Option<u64>,
    pass: u64,
    current: Option<BoxStream>,
    yielded_this_pass: bool,
}

impl ElementStream for RepeatStream {
    fn next(&mut self) -> Result<Option<Element>> {
        loop {
            if self.current.is_none() {
                if self.count.is_some_and(|count| self.pass >= count) {
                    return Ok(None);
                }
                debug!(pass = self.pass, "starting repetition");
                self.yielded_this_pass = false;
                self.current = Some(self.upstream.open(&self.ctx.for_pass(self.pass))?);
            }
            let Some(stream) = self.current.as_mut() else {
                continue;
            };

            if let Some(element) = stream.next()? {
                self.yielded_this_pass = true;
                return Ok(Some(element));
            }

            // Drop the finished pass (and its workers) before starting the next.
            self.current = None;
            self.pass += 1;
            if self.count.is_none() && !self.yielded_this_pass {
                debug!(pass = self.pass, "upstream is empty; ending infinite repeat");
                return Ok(None);
            }
        }
    }
}

impl Operator for RepeatOp {
    fn describe(&self) -> String {
        match self.count {
            Some(count) => format!("repeat({count})"),
            None => "repeat(forever)".to_string(),
        }
    }

    fn open(&self, inputs: &[Dataset], ctx: &IterContext) -> Result<BoxStream> {
        Ok(Box::new(RepeatStream {
            upstream: inputs[0].clone(),
            ctx: *ctx,
            count: self.count,
            pass: 0,
            current: None,
            yielded_this_pass: false,
        }))
    }
}
