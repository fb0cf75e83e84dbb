//! Sentence segmentation for streamed model output
//!
//! Turns an incremental stream of text chunks into speakable sentence units.
//! Natural boundaries (`.`, `!`, `?`) are only honoured once the candidate
//! sentence reaches `min_length` characters, so abbreviations like "Dr." do
//! not fragment speech. Two genuinely short sentences may therefore be merged
//! into one unit; that is an accepted latency/naturalness trade-off and the
//! threshold stays configurable.

use std::sync::LazyLock;

use regex::Regex;

/// Default minimum sentence length (characters) for a natural boundary
pub const DEFAULT_MIN_LENGTH: usize = 15;

/// Default buffer length (characters) that forces a break
pub const DEFAULT_MAX_LENGTH: usize = 200;

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+\s*").expect("valid regex"));

/// Secondary break points, tried when the buffer overflows `max_length`
static SOFT_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[,;]\s+|\s+(?:and|but|or|however|therefore|meanwhile)\s+|\s+[-–—]\s+|\s+\(.*?\)\s+",
    )
    .expect("valid regex")
});

static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").expect("valid regex"));
static ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*]+)\*").expect("valid regex"));
static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("valid regex"));
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#{1,6}\s+").expect("valid regex"));

/// Incremental sentence boundary detector
///
/// One instance per generation session. Feed chunks with
/// [`add_chunk`](Self::add_chunk) and drain the tail with
/// [`flush`](Self::flush) when the stream ends.
#[derive(Debug, Clone)]
pub struct SentenceSegmenter {
    min_length: usize,
    max_length: usize,
    buffer: String,
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_LENGTH, DEFAULT_MAX_LENGTH)
    }
}

impl SentenceSegmenter {
    /// Create a segmenter with explicit length bounds (in characters)
    ///
    /// `max_length` is raised to `min_length + 1` if it is not larger.
    #[must_use]
    pub fn new(min_length: usize, max_length: usize) -> Self {
        Self {
            min_length,
            max_length: max_length.max(min_length + 1),
            buffer: String::new(),
        }
    }

    /// Append a chunk and return every sentence it completes, in order
    pub fn add_chunk(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let mut sentences = Vec::new();
        while let Some(sentence) = self.extract_sentence() {
            sentences.push(sentence);
        }
        sentences
    }

    /// Drain any non-empty remainder as a final sentence
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }

    /// Text buffered but not yet emitted
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    #[must_use]
    pub const fn min_length(&self) -> usize {
        self.min_length
    }

    #[must_use]
    pub const fn max_length(&self) -> usize {
        self.max_length
    }

    fn extract_sentence(&mut self) -> Option<String> {
        let text = self.buffer.trim_start();
        if text.trim_end().is_empty() {
            return None;
        }

        if let Some(end) = self.natural_boundary(text) {
            return self.split_at(end);
        }

        if text.trim_end().chars().count() > self.max_length {
            let end = self
                .closing_boundary(text)
                .unwrap_or_else(|| self.forced_boundary(text));
            return self.split_at(end);
        }

        None
    }

    /// Byte offset (into `text`) just past the first acceptable terminator
    fn natural_boundary(&self, text: &str) -> Option<usize> {
        SENTENCE_END
            .find_iter(text)
            .filter(|m| {
                // A terminator not yet followed by whitespace may sit inside a
                // token ("3.14", "example.com"); the tail waits for flush.
                m.as_str().ends_with(char::is_whitespace)
                    && text[..m.start()].chars().count() >= self.min_length
            })
            .map(|m| m.end())
            .next()
    }

    /// Byte offset (into `text`) of a terminator that closes the buffer
    ///
    /// Only consulted once the buffer is over `max_length`; below that a
    /// closing terminator waits for more text.
    fn closing_boundary(&self, text: &str) -> Option<usize> {
        let text = text.trim_end();
        SENTENCE_END
            .find_iter(text)
            .last()
            .filter(|m| {
                m.end() == text.len() && text[..m.start()].chars().count() >= self.min_length
            })
            .map(|m| m.end())
    }

    /// Byte offset (into `text`) of a forced break; always makes progress
    fn forced_boundary(&self, text: &str) -> usize {
        let text = text.trim_end();
        let floor = byte_offset(text, self.min_length);

        if let Some(m) = SOFT_BREAK.find(&text[floor..]) {
            let end = floor + m.end();
            if !text[..end].trim().is_empty() && end < text.len() {
                return end;
            }
        }

        midpoint_word_boundary(text)
    }

    fn split_at(&mut self, end: usize) -> Option<String> {
        let text = self.buffer.trim_start();
        let sentence = text[..end].trim().to_string();
        let rest = text[end..].to_string();
        self.buffer = rest;
        (!sentence.is_empty()).then_some(sentence)
    }
}

/// Byte offset of the `n`th character, clamped to the string length
fn byte_offset(text: &str, n: usize) -> usize {
    text.char_indices().nth(n).map_or(text.len(), |(i, _)| i)
}

/// Byte offset of the whitespace run nearest the middle word of `text`
///
/// A single unbroken word is split at its character midpoint.
fn midpoint_word_boundary(text: &str) -> usize {
    let word_starts: Vec<usize> = text
        .char_indices()
        .zip(std::iter::once(' ').chain(text.chars()))
        .filter(|&((_, c), prev)| !c.is_whitespace() && prev.is_whitespace())
        .map(|((i, _), _)| i)
        .collect();

    if word_starts.len() >= 2 {
        word_starts[word_starts.len() / 2]
    } else {
        byte_offset(text, text.chars().count() / 2).max(1)
    }
}

/// Strip markdown markup and collapse whitespace before a unit is spoken
#[must_use]
pub fn clean_for_speech(text: &str) -> String {
    let text = BOLD.replace_all(text, "$1");
    let text = ITALIC.replace_all(&text, "$1");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = HEADING.replace_all(&text, "");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_streamed_weather_example() {
        let mut seg = SentenceSegmenter::default();

        assert!(seg.add_chunk("The weather ").is_empty());
        assert_eq!(seg.add_chunk("today is sunny. "), vec!["The weather today is sunny."]);
        assert!(seg.add_chunk("It will rain tomorrow.").is_empty());
        assert_eq!(seg.flush().as_deref(), Some("It will rain tomorrow."));
        assert_eq!(seg.flush(), None);
    }

    #[test]
    fn test_whitespace_chunks_produce_nothing() {
        let mut seg = SentenceSegmenter::default();
        assert!(seg.add_chunk("").is_empty());
        assert!(seg.add_chunk("   \n\t").is_empty());
        assert_eq!(seg.flush(), None);
    }

    #[test]
    fn test_abbreviation_inside_min_window_is_not_split() {
        let mut seg = SentenceSegmenter::default();
        let out = seg.add_chunk("Dr. Smith arrived at noon. He left soon after. ");
        assert_eq!(out, vec!["Dr. Smith arrived at noon.", "He left soon after."]);
    }

    #[test]
    fn test_short_sentences_merge() {
        let mut seg = SentenceSegmenter::default();
        let out = seg.add_chunk("Yes. I can help with that. ");
        assert_eq!(out, vec!["Yes. I can help with that."]);
    }

    #[test]
    fn test_multiple_terminators_kept_together() {
        let mut seg = SentenceSegmenter::default();
        let out = seg.add_chunk("That is really amazing!?! Tell me more");
        assert_eq!(out, vec!["That is really amazing!?!"]);
        assert_eq!(seg.flush().as_deref(), Some("Tell me more"));
    }

    #[test]
    fn test_decimal_at_chunk_edge_waits() {
        let mut seg = SentenceSegmenter::default();
        assert!(seg.add_chunk("The value of pi is roughly 3.").is_empty());
        assert!(seg.add_chunk("14 for most uses").is_empty());
        assert_eq!(
            seg.flush().as_deref(),
            Some("The value of pi is roughly 3.14 for most uses")
        );
    }

    #[test]
    fn test_forced_break_without_punctuation() {
        let word = "lorem";
        let input = vec![word; 42].join(" ");
        assert!(input.len() >= 250);

        let mut seg = SentenceSegmenter::new(15, 200);
        let first = seg.add_chunk(&input);
        assert_eq!(first.len(), 1);
        assert!(first[0].chars().count() >= 15);

        let rest = seg.flush().expect("remainder");
        assert!(!rest.is_empty());
        assert_eq!(normalize(&format!("{} {rest}", first[0])), normalize(&input));
    }

    #[test]
    fn test_overlong_sentence_with_closing_terminator_stays_whole() {
        let input = format!("Here is one, {}end.", "word ".repeat(40));
        assert!(input.chars().count() > 200);

        let mut seg = SentenceSegmenter::new(15, 200);
        assert_eq!(seg.add_chunk(&input), vec![input.clone()]);
        assert_eq!(seg.flush(), None);
    }

    #[test]
    fn test_closing_terminator_waits_within_max_length() {
        let mut seg = SentenceSegmenter::new(15, 200);
        assert!(seg.add_chunk("It will rain tomorrow.").is_empty());
        assert_eq!(seg.pending(), "It will rain tomorrow.");
    }

    #[test]
    fn test_forced_break_prefers_soft_break() {
        let head = "a ".repeat(20);
        let input = format!("{head}first clause, {}", "b ".repeat(100));

        let mut seg = SentenceSegmenter::new(15, 200);
        let out = seg.add_chunk(&input);
        assert_eq!(out.len(), 1);
        assert!(out[0].ends_with("first clause,"));
    }

    #[test]
    fn test_forced_break_single_long_word_terminates() {
        let input = "x".repeat(450);
        let mut seg = SentenceSegmenter::new(15, 200);
        let out = seg.add_chunk(&input);
        assert!(!out.is_empty());
        let total: usize = out.iter().map(String::len).sum::<usize>()
            + seg.flush().map_or(0, |s| s.len());
        assert_eq!(total, 450);
    }

    #[test]
    fn test_natural_splits_respect_min_length() {
        let text = "Hi. Ok. This is long enough to stand alone. No. Sure thing, that works \
                    well for me. Bye.";
        let mut seg = SentenceSegmenter::default();
        for word in text.split_inclusive(' ') {
            for sentence in seg.add_chunk(word) {
                let body = sentence.trim_end_matches(['.', '!', '?']);
                assert!(body.chars().count() >= 15, "too short: {sentence:?}");
            }
        }
    }

    #[test]
    fn test_reconstruction_is_lossless() {
        let text = "Rust makes concurrency safer. Ownership rules prevent data races at \
                    compile time! Does that cover every bug? No, logic errors remain, and \
                    deadlocks can still happen when locks are held across await points. \
                    Design carefully.";
        let mut seg = SentenceSegmenter::default();
        let mut out = Vec::new();
        for chunk in text.as_bytes().chunks(7) {
            out.extend(seg.add_chunk(std::str::from_utf8(chunk).unwrap()));
        }
        out.extend(seg.flush());
        assert!(out.len() >= 3);
        assert_eq!(normalize(&out.join(" ")), normalize(text));
    }

    #[test]
    fn test_multibyte_text_does_not_panic() {
        let input = "Café crème brûlée — très délicieux ".repeat(12);
        let mut seg = SentenceSegmenter::default();
        let mut out = seg.add_chunk(&input);
        out.extend(seg.flush());
        assert_eq!(normalize(&out.join(" ")), normalize(&input));
    }

    #[test]
    fn test_clean_for_speech() {
        assert_eq!(
            clean_for_speech("## Title\n**Bold** and *italic* with `code`\n\nnext  line"),
            "Title Bold and italic with code next line"
        );
        assert_eq!(clean_for_speech("   "), "");
    }
}
