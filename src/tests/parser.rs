use serde::Deserialize;

use crate::config::ReaderConfig;
use crate::corpus::{open_vector_stream, StreamParser, VectorRecord};

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Note {
    code: String,
    text: String,
}

const NOTES: &str = r#"[
  {"code": "a", "text": "plain"},
  {"code": "b", "text": "braces } { and ] brackets ["},
  {"code": "c", "text": "escaped \"quote\" and \\ backslash \\\""},
  {"code": "d", "text": "unicode é and raw é 測定"},
  {"code": "e", "text": "comma, colon: done"}
]"#;

/// Feed `input` in fixed-size slices and drain everything.
fn parse_in_chunks<T: serde::de::DeserializeOwned>(
    input: &[u8],
    chunk_size: usize,
    max_record_bytes: usize,
) -> (Vec<T>, StreamParser<T>) {
    let mut parser = StreamParser::new(max_record_bytes);
    let mut out = Vec::new();

    for chunk in input.chunks(chunk_size) {
        parser.feed(chunk);
        while let Some(record) = parser.next_record() {
            out.push(record);
        }
    }
    parser.finish();
    while let Some(record) = parser.next_record() {
        out.push(record);
    }

    (out, parser)
}

#[test]
fn test_every_chunk_size_yields_same_records() {
    let expected: Vec<Note> = serde_json::from_str(NOTES).unwrap();

    for chunk_size in 1..=NOTES.len() {
        let (records, parser) = parse_in_chunks::<Note>(NOTES.as_bytes(), chunk_size, 1024);
        assert_eq!(records, expected, "chunk size {chunk_size}");
        assert_eq!(parser.skipped(), 0, "chunk size {chunk_size}");
        assert!(parser.is_done());
    }
}

#[test]
fn test_structural_chars_inside_strings() {
    let (records, _) = parse_in_chunks::<Note>(NOTES.as_bytes(), 3, 1024);
    assert_eq!(records[1].text, "braces } { and ] brackets [");
    assert_eq!(records[2].text, r#"escaped "quote" and \ backslash \""#);
    assert_eq!(records.len(), 5);
}

#[test]
fn test_malformed_records_are_skipped_in_order() {
    let input = r#"[
      {"code": "1", "embedding": [1.0, 0.0]},
      {"code": 2, "embedding": [1.0]},
      {"code": "3", "embedding": [0.5, 0.5]},
      {"code": "4", "embedding": "not a vector"},
      {"code": "5", "embedding": [0.0, 1.0]}
    ]"#;

    for chunk_size in [1, 2, 7, 64, input.len()] {
        let (records, parser) = parse_in_chunks::<VectorRecord>(input.as_bytes(), chunk_size, 1024);
        let codes: Vec<&str> = records.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["1", "3", "5"]);
        assert_eq!(parser.parsed(), 3);
        assert_eq!(parser.skipped(), 2);
    }
}

#[test]
fn test_oversized_record_is_dropped_and_parsing_continues() {
    let big = "x".repeat(500);
    let input = format!(
        r#"[{{"code": "a", "text": "short"}}, {{"code": "b", "text": "{big}"}}, {{"code": "c", "text": "tail"}}]"#
    );

    for chunk_size in [1, 5, 16, 100] {
        let (records, parser) = parse_in_chunks::<Note>(input.as_bytes(), chunk_size, 128);
        let codes: Vec<&str> = records.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["a", "c"], "chunk size {chunk_size}");
        assert_eq!(parser.overflowed(), 1);
        assert!(parser.buffered() <= 128 + chunk_size);
    }
}

#[test]
fn test_file_stream_matches_in_memory_parse() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vectors.json");

    let records: Vec<VectorRecord> = (0..50)
        .map(|i| VectorRecord {
            code: format!("{i}-{}", i % 7),
            embedding: vec![i as f32 * 0.5, -1.25, 3.0e-3],
        })
        .collect();
    std::fs::write(&path, serde_json::to_vec_pretty(&records).unwrap()).unwrap();

    for prefetch in [false, true] {
        for chunk_size_bytes in [1, 13, 4096] {
            let config = ReaderConfig {
                chunk_size_bytes,
                max_record_bytes: 1024,
                prefetch,
            };
            let streamed: Vec<VectorRecord> = open_vector_stream(&path, &config)
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap();
            assert_eq!(streamed, records, "prefetch {prefetch}, chunk {chunk_size_bytes}");
        }
    }
}

#[test]
fn test_empty_array() {
    let (records, parser) = parse_in_chunks::<Note>(b"  [ ]  ", 2, 64);
    assert!(records.is_empty());
    assert!(parser.is_done());
}
