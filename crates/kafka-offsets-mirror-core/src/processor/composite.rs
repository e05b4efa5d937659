use async_trait::async_trait;
use tracing::error;

use super::OffsetsProcessor;
use crate::{Error, Result};

/// Runs a fixed list of processors in order for every record.
///
/// A failing processor does not stop the ones after it. The chain reports the
/// last failure to its caller and logs any earlier one.
pub struct CompositeProcessor<T> {
    processors: Vec<Box<dyn OffsetsProcessor<T>>>,
}

impl<T> CompositeProcessor<T>
where
    T: Send + Sync,
{
    pub fn new(processors: Vec<Box<dyn OffsetsProcessor<T>>>) -> Self {
        Self { processors }
    }

    /// Append a processor to the chain
    pub fn with(mut self, processor: impl OffsetsProcessor<T> + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl<T> Default for CompositeProcessor<T> {
    fn default() -> Self {
        Self {
            processors: Vec::new(),
        }
    }
}

#[async_trait]
impl<T> OffsetsProcessor<T> for CompositeProcessor<T>
where
    T: Send + Sync,
{
    async fn process(&mut self, record: &T) -> Result<()> {
        let mut last: Option<(usize, Error)> = None;
        for (index, processor) in self.processors.iter_mut().enumerate() {
            if let Err(e) = processor.process(record).await {
                if let Some((stage, earlier)) = last.replace((index, e)) {
                    error!(stage, error = %earlier, "Processor in chain failed");
                }
            }
        }
        last.map_or(Ok(()), |(_, e)| Err(e))
    }

    async fn close(&mut self) -> Result<()> {
        let mut last: Option<(usize, Error)> = None;
        for (index, processor) in self.processors.iter_mut().enumerate() {
            if let Err(e) = processor.close().await {
                if let Some((stage, earlier)) = last.replace((index, e)) {
                    error!(stage, error = %earlier, "Failed to close processor in chain");
                }
            }
        }
        last.map_or(Ok(()), |(_, e)| Err(e))
    }
}
