//! Overlapping text chunkers.
//!
//! Splits extracted document text into the spans that get embedded and
//! indexed. Two strategies:
//!
//! - **fixed** — hard windows of `chunk_size` chars, stepping by
//!   `chunk_size - overlap`.
//! - **recursive** — same windowing, but the cut point prefers a paragraph
//!   (`\n\n`) or sentence boundary near the end of the window before falling
//!   back to the hard cut. A quality heuristic only; coverage is identical.
//!
//! Offsets are *character* offsets into the source text, so multi-byte
//! UTF-8 input never splits inside a code point. Both strategies guarantee:
//!
//! - every character of the input is covered by at least one span;
//! - consecutive fixed spans share exactly `overlap` characters (except
//!   possibly the final one);
//! - empty input yields an empty sequence, not an error.
//!
//! Callers validate `chunk_size > 0` and `overlap < chunk_size` up front
//! (config validation); the chunkers are pure functions.

use crate::config::{ChunkStrategy, ChunkingConfig};

/// A contiguous span of a document's text, the unit of embedding and
/// retrieval. `start..end` are char offsets into the source.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
    pub seq: u32,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Split `text` into overlapping chunks using the configured strategy.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<ChunkSpan> {
    match config.strategy {
        ChunkStrategy::Fixed => chunk_fixed(text, config.chunk_size, config.overlap),
        ChunkStrategy::Recursive => chunk_recursive(text, config.chunk_size, config.overlap),
    }
}

/// Fixed-size windows: `text[offset..offset+chunk_size]`, advancing by
/// `chunk_size - overlap` until the tail is consumed.
pub fn chunk_fixed(text: &str, chunk_size: usize, overlap: usize) -> Vec<ChunkSpan> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    if total == 0 {
        return Vec::new();
    }

    let stride = chunk_size - overlap;
    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut seq = 0u32;

    loop {
        let end = (start + chunk_size).min(total);
        spans.push(make_span(&chars, seq, start, end));
        seq += 1;
        if end == total {
            break;
        }
        start += stride;
    }

    spans
}

/// Like [`chunk_fixed`], but each cut prefers a paragraph or sentence
/// boundary in the back half of the window. The next window still starts
/// `overlap` chars before the cut, so coverage is unaffected.
pub fn chunk_recursive(text: &str, chunk_size: usize, overlap: usize) -> Vec<ChunkSpan> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    if total == 0 {
        return Vec::new();
    }

    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut seq = 0u32;

    loop {
        let hard_end = (start + chunk_size).min(total);
        let end = if hard_end == total {
            hard_end
        } else {
            natural_break(&chars, start, hard_end)
        };

        spans.push(make_span(&chars, seq, start, end));
        seq += 1;
        if end == total {
            break;
        }
        // Step back by the overlap, but always make forward progress.
        start = end.saturating_sub(overlap).max(start + 1);
    }

    spans
}

/// Find the best cut point in `(start, hard_end]`: the last paragraph break,
/// then the last sentence end, searched in the back half of the window.
/// Falls back to the hard cut when neither appears.
fn natural_break(chars: &[char], start: usize, hard_end: usize) -> usize {
    let floor = start + (hard_end - start) / 2;

    // Paragraph boundary: cut after "\n\n".
    for i in (floor..hard_end.saturating_sub(1)).rev() {
        if chars[i] == '\n' && chars[i + 1] == '\n' {
            return i + 2;
        }
    }

    // Sentence boundary: cut after ". " / "! " / "? " or a single newline.
    for i in (floor..hard_end.saturating_sub(1)).rev() {
        if chars[i + 1].is_whitespace() && matches!(chars[i], '.' | '!' | '?') {
            return i + 2;
        }
        if chars[i] == '\n' {
            return i + 1;
        }
    }

    hard_end
}

fn make_span(chars: &[char], seq: u32, start: usize, end: usize) -> ChunkSpan {
    ChunkSpan {
        seq,
        start,
        end,
        text: chars[start..end].iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_fixed("", 2000, 200).is_empty());
        assert!(chunk_recursive("", 2000, 200).is_empty());
    }

    #[test]
    fn short_text_single_chunk() {
        let spans = chunk_fixed("hello world", 2000, 200);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans[0].end, 11);
        assert_eq!(spans[0].text, "hello world");
    }

    #[test]
    fn five_thousand_chars_makes_three_chunks() {
        let text: String = std::iter::repeat('x').take(5000).collect();
        let spans = chunk_fixed(&text, 2000, 200);
        assert_eq!(spans.len(), 3);
        assert_eq!((spans[0].start, spans[0].end), (0, 2000));
        assert_eq!((spans[1].start, spans[1].end), (1800, 3800));
        assert_eq!((spans[2].start, spans[2].end), (3600, 5000));
    }

    #[test]
    fn consecutive_chunks_share_exact_overlap() {
        let text: String = ('a'..='z').cycle().take(4321).collect();
        let spans = chunk_fixed(&text, 500, 60);
        for pair in spans.windows(2) {
            assert_eq!(pair[0].end - pair[1].start, 60);
            let tail: String = pair[0].text.chars().skip(500 - 60).collect();
            let head: String = pair[1].text.chars().take(60).collect();
            // The final chunk may be short, so only compare when full.
            if pair[0].text.chars().count() == 500 {
                assert_eq!(tail, head);
            }
        }
    }

    #[test]
    fn fixed_chunks_cover_every_char() {
        for len in [1usize, 99, 100, 101, 250, 999] {
            let text: String = std::iter::repeat('y').take(len).collect();
            let spans = chunk_fixed(&text, 100, 20);
            let mut covered = vec![false; len];
            for s in &spans {
                for flag in covered[s.start..s.end].iter_mut() {
                    *flag = true;
                }
            }
            assert!(covered.iter().all(|c| *c), "gap at len {}", len);
            assert_eq!(spans.last().unwrap().end, len);
        }
    }

    #[test]
    fn recursive_chunks_cover_every_char() {
        let text = "First paragraph with a few sentences. And a second one.\n\n\
                    Second paragraph continues here with more content. Yet more text.\n\n\
                    Third paragraph closes the document out with a final line."
            .repeat(10);
        let total = text.chars().count();
        let spans = chunk_recursive(&text, 120, 30);
        let mut covered = vec![false; total];
        for s in &spans {
            for flag in covered[s.start..s.end].iter_mut() {
                *flag = true;
            }
        }
        assert!(covered.iter().all(|c| *c));
        assert_eq!(spans.last().unwrap().end, total);
    }

    #[test]
    fn recursive_prefers_paragraph_break() {
        let text = format!("{}\n\n{}", "a".repeat(80), "b".repeat(80));
        let spans = chunk_recursive(&text, 120, 10);
        // The first cut lands after the blank line, not mid-paragraph.
        assert!(spans[0].text.ends_with("\n\n"));
        assert_eq!(spans[0].end, 82);
    }

    #[test]
    fn recursive_falls_back_to_hard_cut() {
        let text: String = std::iter::repeat('z').take(300).collect();
        let spans = chunk_recursive(&text, 100, 20);
        assert_eq!((spans[0].start, spans[0].end), (0, 100));
        assert_eq!(spans[1].start, 80);
    }

    #[test]
    fn multibyte_text_offsets_are_char_based() {
        let text: String = std::iter::repeat('é').take(150).collect();
        let spans = chunk_fixed(&text, 100, 10);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text.chars().count(), 100);
        assert_eq!((spans[1].start, spans[1].end), (90, 150));
    }

    #[test]
    fn strategy_dispatch() {
        let config = ChunkingConfig {
            chunk_size: 100,
            overlap: 10,
            strategy: ChunkStrategy::Fixed,
        };
        let text: String = std::iter::repeat('q').take(250).collect();
        assert_eq!(chunk_text(&text, &config).len(), 3);
    }

    #[test]
    fn sequence_indices_are_contiguous() {
        let text: String = std::iter::repeat('k').take(1000).collect();
        let spans = chunk_fixed(&text, 100, 25);
        for (i, s) in spans.iter().enumerate() {
            assert_eq!(s.seq, i as u32);
        }
    }
}
