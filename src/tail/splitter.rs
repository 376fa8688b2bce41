// src/tail/splitter.rs

//! Byte stream to line conversion.

/// Line terminator. Lines are split on this byte only; `\r` is kept.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Stateful splitter turning arbitrary byte appends into complete lines.
///
/// Bytes after the last terminator are held back as a fragment and prefixed
/// to the next [`feed`](LineSplitter::feed). The output depends only on the
/// concatenated input, never on how it was chunked.
#[derive(Debug, Default, Clone)]
pub struct LineSplitter {
    fragment: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume `bytes` and return every line completed by them, in order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = bytes;

        while let Some(pos) = rest.iter().position(|b| *b == LINE_TERMINATOR) {
            let (head, tail) = rest.split_at(pos);
            let line = if self.fragment.is_empty() {
                decode(head)
            } else {
                self.fragment.extend_from_slice(head);
                let joined = decode(&self.fragment);
                self.fragment.clear();
                joined
            };
            lines.push(line);
            rest = &tail[1..];
        }

        self.fragment.extend_from_slice(rest);
        lines
    }

    /// Bytes received after the last terminator.
    pub fn fragment(&self) -> &[u8] {
        &self.fragment
    }

    /// Forget the fragment (rotation, teardown). It is never delivered.
    pub fn reset(&mut self) {
        self.fragment.clear();
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
