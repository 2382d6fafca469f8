use std::collections::VecDeque;

/// Bounded FIFO of output chunks used to redraw a freshly attached terminal.
///
/// When full, the oldest half is dropped in one go so pushes stay cheap.
/// Positions handed out by [`History::mark`] count every chunk ever pushed,
/// which lets callers ask for "output since" across evictions.
#[derive(Debug)]
pub struct History {
    chunks: VecDeque<String>,
    cap: usize,
    evicted: u64,
}

impl History {
    pub fn new(cap: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            cap: cap.max(1),
            evicted: 0,
        }
    }

    pub fn push(&mut self, chunk: String) {
        if self.chunks.len() >= self.cap {
            let drop = (self.chunks.len() / 2).max(1);
            self.chunks.drain(..drop);
            self.evicted += drop as u64;
        }
        self.chunks.push_back(chunk);
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.chunks.iter().map(String::as_str)
    }

    /// Everything retained, concatenated in order.
    pub fn replay(&self) -> String {
        self.chunks.iter().map(String::as_str).collect()
    }

    pub fn mark(&self) -> u64 {
        self.evicted + self.chunks.len() as u64
    }

    /// Retained output pushed at or after `mark`, limited to the last
    /// `max_bytes` (cut on a char boundary).
    pub fn since(&self, mark: u64, max_bytes: usize) -> String {
        let skip = mark.saturating_sub(self.evicted) as usize;
        let text: String = self.chunks.iter().skip(skip).map(String::as_str).collect();
        if text.len() <= max_bytes {
            return text;
        }
        let mut start = text.len() - max_bytes;
        while !text.is_char_boundary(start) {
            start += 1;
        }
        text[start..].to_string()
    }
}
