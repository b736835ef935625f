//! UTF-8 seam repair for streamed deltas.
//!
//! The upstream stream is chunked on byte boundaries and occasionally
//! splits multi-byte codepoints, leaving short runs of U+FFFD replacement
//! characters at chunk seams. This is deliberately a filter over the
//! decoded text, not a decoder: codepoint boundaries inside the runtime's
//! delta strings are not recoverable here.

const REPLACEMENT: char = '\u{FFFD}';

/// Strip replacement-character runs from a delta.
pub fn scrub_replacement_runs(text: &str) -> String {
    if !text.contains(REPLACEMENT) {
        return text.to_owned();
    }
    text.chars().filter(|c| *c != REPLACEMENT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_is_unchanged() {
        assert_eq!(scrub_replacement_runs("hello, 世界"), "hello, 世界");
    }

    #[test]
    fn single_replacement_is_removed() {
        assert_eq!(scrub_replacement_runs("ab\u{FFFD}cd"), "abcd");
    }

    #[test]
    fn run_at_chunk_seam_is_removed() {
        assert_eq!(
            scrub_replacement_runs("前半\u{FFFD}\u{FFFD}\u{FFFD}後半"),
            "前半後半"
        );
    }

    #[test]
    fn output_never_contains_replacement_chars() {
        let noisy = "\u{FFFD}a\u{FFFD}\u{FFFD}b\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}c";
        let clean = scrub_replacement_runs(noisy);
        assert!(!clean.contains(REPLACEMENT));
        assert_eq!(clean, "abc");
    }

    #[test]
    fn empty_input() {
        assert_eq!(scrub_replacement_runs(""), "");
    }
}
