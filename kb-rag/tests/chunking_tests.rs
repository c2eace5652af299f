//! Property tests for boundary-aware chunking.

use kb_rag::chunking::{Chunker, TextChunker};
use proptest::prelude::*;

/// Words separated by spaces, sentence terminators and newlines.
fn arb_text() -> impl Strategy<Value = String> {
    "[a-z]{1,8}([ .!?\n]{1,2}[a-zé]{1,8}){0,300}"
}

fn arb_chunker() -> impl Strategy<Value = TextChunker> {
    (10usize..200).prop_flat_map(|size| (Just(size), 0..size)).prop_map(|(size, overlap)| {
        TextChunker::new(size, overlap).unwrap()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn chunking_is_deterministic(text in arb_text(), chunker in arb_chunker()) {
        prop_assert_eq!(chunker.chunk(&text), chunker.chunk(&text));
    }

    #[test]
    fn spans_are_bounded_and_advance(text in arb_text(), chunker in arb_chunker()) {
        let spans = chunker.chunk_spans(&text);
        prop_assert!(!spans.is_empty());
        for span in &spans {
            prop_assert!(!span.is_empty());
            prop_assert!(span.len() <= chunker.chunk_size());
        }
        for pair in spans.windows(2) {
            prop_assert!(pair[1].start > pair[0].start, "no progress: {:?}", pair);
            prop_assert!(
                pair[1].start + chunker.chunk_overlap() >= pair[0].end,
                "overlap larger than configured: {:?}",
                pair
            );
        }
    }

    #[test]
    fn every_non_whitespace_char_is_covered(text in arb_text(), chunker in arb_chunker()) {
        let spans = chunker.chunk_spans(&text);
        for (offset, c) in text.chars().enumerate() {
            if c.is_whitespace() {
                continue;
            }
            prop_assert!(
                spans.iter().any(|s| s.start <= offset && offset < s.end),
                "char {} at {} not covered by {:?}",
                c,
                offset,
                spans
            );
        }
    }

    #[test]
    fn chunks_are_the_span_text(text in arb_text(), chunker in arb_chunker()) {
        let chars: Vec<char> = text.chars().collect();
        let expected: Vec<String> = chunker
            .chunk_spans(&text)
            .into_iter()
            .map(|s| chars[s.start..s.end].iter().collect())
            .collect();
        prop_assert_eq!(chunker.chunk(&text), expected);
    }
}

#[test]
fn whitespace_only_text_has_no_chunks() {
    let chunker = TextChunker::new(100, 10).unwrap();
    assert!(chunker.chunk("").is_empty());
    assert!(chunker.chunk(" \n\n\t ").is_empty());
}
