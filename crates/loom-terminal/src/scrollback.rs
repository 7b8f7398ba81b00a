//! Byte-bounded output history for the shared run process.

use std::collections::VecDeque;

/// Default scrollback limit: 256 KiB.
pub const DEFAULT_SCROLLBACK_BYTES: usize = 256 * 1024;

/// Output chunks in arrival order, trimmed from the front once the total
/// exceeds `max_bytes`.
#[derive(Debug, Clone)]
pub struct Scrollback {
    chunks: VecDeque<Vec<u8>>,
    bytes: usize,
    max_bytes: usize,
}

impl Default for Scrollback {
    fn default() -> Self {
        Self::new(DEFAULT_SCROLLBACK_BYTES)
    }
}

impl Scrollback {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            bytes: 0,
            max_bytes: max_bytes.max(1),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        if chunk.len() >= self.max_bytes {
            self.clear();
            self.chunks
                .push_back(chunk[chunk.len() - self.max_bytes..].to_vec());
            self.bytes = self.max_bytes;
            return;
        }

        self.chunks.push_back(chunk.to_vec());
        self.bytes += chunk.len();

        while self.bytes > self.max_bytes {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let excess = self.bytes - self.max_bytes;
            if front.len() <= excess {
                self.bytes -= front.len();
                self.chunks.pop_front();
            } else {
                front.drain(..excess);
                self.bytes -= excess;
            }
        }
    }

    /// Everything buffered, concatenated.
    pub fn snapshot(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bytes);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.bytes = 0;
    }
}
