//! Bounded turn context.

/// Total blocks allowed before the tail is trimmed.
pub const MAX_CONTEXT_BLOCKS: usize = 10;

/// Tail blocks kept after a trim.
pub const RETAINED_TAIL_BLOCKS: usize = 8;

/// Ordered text blocks concatenated into each prompt.
///
/// The head block (preamble, task, repository digest) is held apart from
/// the tail and survives every trim.
#[derive(Debug, Clone)]
pub struct TurnContext {
    head: String,
    tail: Vec<String>,
}

impl TurnContext {
    pub fn new(head: impl Into<String>) -> Self {
        Self {
            head: head.into(),
            tail: Vec::new(),
        }
    }

    pub fn head(&self) -> &str {
        &self.head
    }

    /// Append a block, trimming the tail once the total exceeds the limit.
    pub fn push(&mut self, block: impl Into<String>) {
        self.tail.push(block.into());
        if self.len() > MAX_CONTEXT_BLOCKS {
            let excess = self.tail.len() - RETAINED_TAIL_BLOCKS;
            self.tail.drain(..excess);
        }
    }

    /// Number of blocks including the head.
    pub fn len(&self) -> usize {
        self.tail.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Most recent tail blocks, oldest first.
    pub fn recent(&self, count: usize) -> &[String] {
        &self.tail[self.tail.len().saturating_sub(count)..]
    }

    pub fn render(&self) -> String {
        std::iter::once(self.head.as_str())
            .chain(self.tail.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
