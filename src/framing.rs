//! Splits bytes read from the sensor into candidate records.
//!
//! In `read` framing every socket read is taken as exactly one record, which
//! is what the sensor firmware relies on: it writes one JSON object per send
//! and never terminates it. TCP is free to coalesce or split those sends, in
//! which case the frame fails to decode and is discarded.
//!
//! In `newline` framing bytes are buffered across reads and split on `\n`,
//! so a sensor that terminates each object gets exact record boundaries.

use bytes::{Bytes, BytesMut};
use tracing::warn;

use crate::config::Framing;

/// Largest unterminated line kept while waiting for `\n`
pub const MAX_PENDING_LINE: usize = 64 * 1024;

/// Stateful frame splitter for one connection
#[derive(Debug)]
pub struct Framer {
    mode: Framing,
    pending: BytesMut,
}

impl Framer {
    pub fn new(mode: Framing) -> Self {
        Framer {
            mode,
            pending: BytesMut::new(),
        }
    }

    /// Feed the bytes of one read and collect the frames they complete.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        match self.mode {
            Framing::Read => vec![Bytes::copy_from_slice(chunk)],
            Framing::Newline => self.push_lines(chunk),
        }
    }

    /// Take whatever is left once the sensor has closed its side.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = self.pending.split().freeze();
        if is_blank(&rest) {
            None
        } else {
            Some(rest)
        }
    }

    fn push_lines(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line = self.pending.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            if !is_blank(&line) {
                frames.push(line.freeze());
            }
        }

        if self.pending.len() > MAX_PENDING_LINE {
            warn!(
                bytes = self.pending.len(),
                limit = MAX_PENDING_LINE,
                "Discarding unterminated line"
            );
            self.pending.clear();
        }

        frames
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| b.is_ascii_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_framing_passes_each_read_through() {
        let mut framer = Framer::new(Framing::Read);
        let frames = framer.push(b"{\"a\":1}{\"b\":2}");
        assert_eq!(frames, vec![Bytes::from_static(b"{\"a\":1}{\"b\":2}")]);
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn test_newline_framing_splits_lines() {
        let mut framer = Framer::new(Framing::Newline);
        let frames = framer.push(b"{\"a\":1}\n{\"b\":2}\r\n");
        assert_eq!(
            frames,
            vec![
                Bytes::from_static(b"{\"a\":1}"),
                Bytes::from_static(b"{\"b\":2}")
            ]
        );
    }

    #[test]
    fn test_newline_framing_reassembles_across_reads() {
        let mut framer = Framer::new(Framing::Newline);
        assert!(framer.push(b"{\"temp\":").is_empty());
        let frames = framer.push(b" 21.5}\n{\"hum\"");
        assert_eq!(frames, vec![Bytes::from_static(b"{\"temp\": 21.5}")]);
        assert_eq!(framer.finish(), Some(Bytes::from_static(b"{\"hum\"")));
    }

    #[test]
    fn test_newline_framing_skips_blank_lines() {
        let mut framer = Framer::new(Framing::Newline);
        let frames = framer.push(b"\n\r\n  \n{}\n");
        assert_eq!(frames, vec![Bytes::from_static(b"{}")]);
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn test_newline_framing_drops_oversized_line() {
        let mut framer = Framer::new(Framing::Newline);
        let big = vec![b'x'; MAX_PENDING_LINE + 1];
        assert!(framer.push(&big).is_empty());
        assert_eq!(framer.finish(), None);

        // Next terminated line is still recognised
        let frames = framer.push(b"{}\n");
        assert_eq!(frames, vec![Bytes::from_static(b"{}")]);
    }
}
