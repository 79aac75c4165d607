//! Incremental parser for a top-level JSON array of flat objects.
//!
//! Bytes arrive in arbitrary chunks. The parser keeps only the unframed tail
//! of the input, frames each `{...}` at array level, deserializes it and
//! queues the result right away. Lexer state (array found, inside a string,
//! pending escape) survives chunk boundaries, so an object may be split
//! anywhere. Structural characters are ASCII, so scanning bytes is safe for
//! UTF-8 input even when a multi-byte sequence is split between chunks.

use std::collections::VecDeque;

use serde::de::DeserializeOwned;

use crate::corpus::reader::ChunkSource;
use crate::corpus::CorpusError;

/// Default upper bound for a single buffered record (10 MiB).
pub const DEFAULT_MAX_RECORD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    /// Before the opening `[`.
    SeekingArray,
    /// Structural context, inside the array.
    InArray,
    /// Inside a quoted string.
    InString,
    /// After a backslash inside a string.
    Escaped,
    /// The closing `]` was seen.
    Done,
}

pub struct StreamParser<T> {
    buf: Vec<u8>,
    /// Next byte of `buf` to scan.
    pos: usize,
    state: LexState,
    depth: usize,
    /// Start of the object currently being framed, as an index into `buf`.
    obj_start: Option<usize>,
    /// The current object outgrew the limit and is skipped when it closes.
    discarding: bool,
    max_record_bytes: usize,
    ready: VecDeque<T>,
    parsed: usize,
    skipped: usize,
    overflowed: usize,
}

impl<T: DeserializeOwned> StreamParser<T> {
    pub fn new(max_record_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            state: LexState::SeekingArray,
            depth: 0,
            obj_start: None,
            discarding: false,
            max_record_bytes: max_record_bytes.max(1),
            ready: VecDeque::new(),
            parsed: 0,
            skipped: 0,
            overflowed: 0,
        }
    }

    /// Consume the next chunk of input. Complete records become available
    /// through `next_record`.
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.state == LexState::Done {
            return;
        }

        self.buf.extend_from_slice(chunk);
        self.scan();
        self.compact();
        self.enforce_limit();
    }

    /// Next parsed record, in file order.
    pub fn next_record(&mut self) -> Option<T> {
        self.ready.pop_front()
    }

    /// True once the array's closing bracket has been seen.
    pub fn is_done(&self) -> bool {
        self.state == LexState::Done
    }

    /// Signal end of input. A trailing unterminated object is dropped.
    pub fn finish(&mut self) {
        match self.state {
            LexState::SeekingArray => log::warn!("input ended before an array was found"),
            LexState::Done => {}
            _ => {
                if self.obj_start.is_some() || self.discarding {
                    log::warn!("input ended inside an object, dropping {} bytes", self.buf.len());
                    self.skipped += 1;
                } else {
                    log::warn!("input ended before the array was closed");
                }
            }
        }
        self.buf.clear();
        self.pos = 0;
        self.obj_start = None;
        self.discarding = false;
    }

    /// Records deserialized successfully so far.
    pub fn parsed(&self) -> usize {
        self.parsed
    }

    /// Framed spans that failed to deserialize, plus truncated trailing objects.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Objects dropped because they exceeded the buffer limit.
    pub fn overflowed(&self) -> usize {
        self.overflowed
    }

    /// Bytes currently held in the working buffer.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn scan(&mut self) {
        while self.pos < self.buf.len() {
            let byte = self.buf[self.pos];

            match self.state {
                LexState::SeekingArray => {
                    if byte == b'[' {
                        self.state = LexState::InArray;
                    }
                }
                LexState::InString => match byte {
                    b'\\' => self.state = LexState::Escaped,
                    b'"' => self.state = LexState::InArray,
                    _ => {}
                },
                LexState::Escaped => self.state = LexState::InString,
                LexState::InArray => match byte {
                    b'"' => self.state = LexState::InString,
                    b'{' => {
                        if self.depth == 0 && !self.discarding {
                            self.obj_start = Some(self.pos);
                        }
                        self.depth += 1;
                    }
                    b'}' => {
                        // a stray `}` at array level is ignored
                        if self.depth > 0 {
                            self.depth -= 1;
                            if self.depth == 0 {
                                self.close_object(self.pos);
                            }
                        }
                    }
                    b']' if self.depth == 0 => {
                        self.state = LexState::Done;
                        return;
                    }
                    _ => {}
                },
                LexState::Done => return,
            }

            self.pos += 1;
        }
    }

    fn close_object(&mut self, end: usize) {
        if self.discarding {
            self.discarding = false;
            return;
        }

        let Some(start) = self.obj_start.take() else {
            return;
        };

        match serde_json::from_slice::<T>(&self.buf[start..=end]) {
            Ok(record) => {
                self.parsed += 1;
                self.ready.push_back(record);
            }
            Err(err) => {
                self.skipped += 1;
                log::warn!("skipping malformed record ({} bytes): {err}", end + 1 - start);
            }
        }
    }

    /// Drop everything that can no longer be part of a record.
    fn compact(&mut self) {
        let keep_from = match self.state {
            LexState::SeekingArray | LexState::Done => self.buf.len(),
            _ => self.obj_start.unwrap_or(self.pos),
        };

        if keep_from == 0 {
            return;
        }

        self.buf.drain(..keep_from);
        self.pos -= keep_from;
        if let Some(start) = self.obj_start.as_mut() {
            *start -= keep_from;
        }
    }

    /// Bounded memory: an object that cannot be framed within the limit is
    /// dropped instead of buffered. Depth tracking continues so the rest of
    /// the oversized object is skipped and framing resumes after it.
    fn enforce_limit(&mut self) {
        if self.obj_start.is_none() || self.buf.len() <= self.max_record_bytes {
            return;
        }

        log::warn!(
            "record exceeds {} bytes without closing, dropping {} buffered bytes",
            self.max_record_bytes,
            self.buf.len()
        );
        self.overflowed += 1;
        self.discarding = true;
        self.obj_start = None;
        self.buf.clear();
        self.pos = 0;
    }
}

/// Pulls chunks from a source on demand and yields records one at a time.
pub struct RecordStream<S, T> {
    source: S,
    parser: StreamParser<T>,
    exhausted: bool,
}

impl<S: ChunkSource, T: DeserializeOwned> RecordStream<S, T> {
    pub fn new(source: S, max_record_bytes: usize) -> Self {
        Self {
            source,
            parser: StreamParser::new(max_record_bytes),
            exhausted: false,
        }
    }

    pub fn parser(&self) -> &StreamParser<T> {
        &self.parser
    }
}

impl<S: ChunkSource, T: DeserializeOwned> Iterator for RecordStream<S, T> {
    type Item = Result<T, CorpusError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.parser.next_record() {
                return Some(Ok(record));
            }

            if self.exhausted || self.parser.is_done() {
                return None;
            }

            match self.source.next_chunk() {
                Ok(Some(chunk)) => self.parser.feed(&chunk),
                Ok(None) => {
                    self.exhausted = true;
                    self.parser.finish();
                }
                Err(err) => {
                    self.exhausted = true;
                    return Some(Err(CorpusError::Io(err)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Item {
        code: String,
        #[serde(default)]
        embedding: Vec<f32>,
    }

    fn item(code: &str, embedding: &[f32]) -> Item {
        Item {
            code: code.to_string(),
            embedding: embedding.to_vec(),
        }
    }

    fn parse_all(input: &[u8], chunk_size: usize) -> (Vec<Item>, StreamParser<Item>) {
        let mut parser = StreamParser::<Item>::new(DEFAULT_MAX_RECORD_BYTES);
        let mut out = vec![];
        for chunk in input.chunks(chunk_size) {
            parser.feed(chunk);
            while let Some(record) = parser.next_record() {
                out.push(record);
            }
        }
        parser.finish();
        (out, parser)
    }

    #[test]
    fn test_single_chunk() {
        let input = br#"[{"code": "a", "embedding": [1.0, 2.0]}, {"code": "b", "embedding": []}]"#;
        let (items, parser) = parse_all(input, input.len());

        assert_eq!(items, vec![item("a", &[1.0, 2.0]), item("b", &[])]);
        assert!(parser.is_done());
        assert_eq!(parser.parsed(), 2);
        assert_eq!(parser.skipped(), 0);
    }

    #[test]
    fn test_yields_before_input_ends() {
        let mut parser = StreamParser::<Item>::new(1024);
        parser.feed(br#"  [ {"code": "a"}, {"code": "#);

        assert_eq!(parser.next_record(), Some(item("a", &[])));
        assert_eq!(parser.next_record(), None);
        assert!(!parser.is_done());

        parser.feed(br#""b"} ]"#);
        assert_eq!(parser.next_record(), Some(item("b", &[])));
        assert!(parser.is_done());
    }

    #[test]
    fn test_waits_for_array_start() {
        let mut parser = StreamParser::<Item>::new(1024);
        parser.feed(b"   \n  ");
        assert_eq!(parser.buffered(), 0);
        parser.feed(br#"[{"code": "x"}]"#);
        assert_eq!(parser.next_record(), Some(item("x", &[])));
    }

    #[test]
    fn test_escaped_quote_split_across_chunks() {
        let input = br#"[{"code": "a\"}b"}, {"code": "c"}]"#;
        for size in 1..input.len() {
            let (items, _) = parse_all(input, size);
            assert_eq!(items, vec![item("a\"}b", &[]), item("c", &[])], "chunk size {size}");
        }
    }

    #[test]
    fn test_escaped_backslash_before_quote() {
        let input = br#"[{"code": "a\\"}, {"code": "{b}"}]"#;
        let (items, _) = parse_all(input, 3);
        assert_eq!(items, vec![item("a\\", &[]), item("{b}", &[])]);
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let input = "[{\"code\": \"héllo→wörld\"}]".as_bytes();
        for size in 1..8 {
            let (items, _) = parse_all(input, size);
            assert_eq!(items, vec![item("héllo→wörld", &[])]);
        }
    }

    #[test]
    fn test_stops_at_closing_bracket() {
        let mut parser = StreamParser::<Item>::new(1024);
        parser.feed(br#"[{"code": "a"}] {"code": "ignored"}"#);
        parser.feed(br#"{"code": "also ignored"}"#);

        assert_eq!(parser.next_record(), Some(item("a", &[])));
        assert_eq!(parser.next_record(), None);
        assert!(parser.is_done());
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_empty_array() {
        let (items, parser) = parse_all(b"[]", 1);
        assert!(items.is_empty());
        assert!(parser.is_done());
    }

    #[test]
    fn test_truncated_input_drops_partial_object() {
        let (items, parser) = parse_all(br#"[{"code": "a"}, {"code": "b", "emb"#, 5);
        assert_eq!(items, vec![item("a", &[])]);
        assert!(!parser.is_done());
        assert_eq!(parser.skipped(), 1);
    }

    #[test]
    fn test_oversized_record_is_dropped_and_framing_recovers() {
        let big: String = (0..200).map(|i| format!("{i}.5, ")).collect();
        let input = format!(
            r#"[{{"code": "a"}}, {{"code": "huge", "embedding": [{big}1.0], "note": "{{]"}}, {{"code": "b"}}]"#
        );

        let mut parser = StreamParser::<Item>::new(64);
        let mut out = vec![];
        for chunk in input.as_bytes().chunks(16) {
            parser.feed(chunk);
            assert!(parser.buffered() <= 64 + 16);
            while let Some(record) = parser.next_record() {
                out.push(record);
            }
        }

        assert_eq!(out, vec![item("a", &[]), item("b", &[])]);
        assert_eq!(parser.overflowed(), 1);
        assert!(parser.is_done());
    }

    #[test]
    fn test_record_stream_over_file() {
        use crate::corpus::reader::ChunkReader;

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.json");
        std::fs::write(
            &path,
            br#"[
  {"code": "a", "embedding": [0.5]},
  {"code": "b", "embedding": [0.25]}
]"#,
        )
        .unwrap();

        let reader = ChunkReader::open(&path, 7).unwrap();
        let stream = RecordStream::<_, Item>::new(reader, 1024);
        let items: Vec<Item> = stream.collect::<Result<_, _>>().unwrap();

        assert_eq!(items, vec![item("a", &[0.5]), item("b", &[0.25])]);
    }
}
