//! Exact token-bounded truncation.
//!
//! The bound is exact under whatever tokenizer the [`TokenCounter`] carries:
//! the assembled output is re-measured before it is returned.

use std::borrow::Cow;

use crate::TokenCounter;

/// Marker appended to truncated text.
pub const ELLIPSIS: &str = "...";

/// Tokens withheld for [`ELLIPSIS`] before the prefix search.
const ELLIPSIS_RESERVE: u32 = 3;

/// Rough characters-per-token ratio used only to place the first guess.
const ESTIMATED_CHARS_PER_TOKEN: f64 = 3.5;

/// Characters per token assumed when sizing the search window. Generous, so
/// the window almost always already holds the answer.
const WINDOW_CHARS_PER_TOKEN: usize = 8;

/// Smallest search window, in characters.
const MIN_WINDOW_CHARS: usize = 64;

/// Returns the byte offset of the longest char-boundary prefix of `text` whose
/// token count is at most `limit`.
///
/// Only a window of about `limit * 8` characters is measured; the window
/// doubles while it fits entirely. Cost therefore follows `limit`, not the
/// length of `text`. Within the window the search is binary over character
/// positions, with the first guess placed at the character estimate.
#[must_use]
pub fn longest_fitting_prefix(counter: &TokenCounter, text: &str, limit: u32) -> usize {
    let mut window_chars = (limit as usize)
        .saturating_mul(WINDOW_CHARS_PER_TOKEN)
        .max(MIN_WINDOW_CHARS);

    loop {
        let end = text
            .char_indices()
            .nth(window_chars)
            .map_or(text.len(), |(i, _)| i);
        let window = &text[..end];
        if counter.count(window) > limit {
            return search_window(counter, window, limit);
        }
        if end == text.len() {
            return end;
        }
        window_chars = window_chars.saturating_mul(2);
    }
}

/// Binary search inside `window`, which is known not to fit.
fn search_window(counter: &TokenCounter, window: &str, limit: u32) -> usize {
    let boundaries: Vec<usize> = window
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(window.len()))
        .collect();
    let fits = |chars: usize| counter.count(&window[..boundaries[chars]]) <= limit;

    // `lo` chars are known to fit; the whole window is known not to.
    let mut lo = 0usize;
    let mut hi = boundaries.len() - 2;
    if hi == 0 {
        return 0;
    }

    let estimate = (f64::from(limit) * ESTIMATED_CHARS_PER_TOKEN).ceil() as usize;
    let mut guess = estimate.clamp(1, hi);
    while lo < hi {
        if fits(guess) {
            lo = guess;
        } else {
            hi = guess - 1;
        }
        guess = lo + (hi - lo).div_ceil(2);
    }

    boundaries[lo]
}

/// Cuts `text` to at most `max_tokens` tokens.
///
/// Text that already fits is returned borrowed and unchanged. Otherwise the
/// longest fitting prefix is kept, its trailing whitespace trimmed, and
/// [`ELLIPSIS`] appended when `add_ellipsis` is set. Applying the function to
/// its own output returns that output unchanged.
#[must_use]
pub fn truncate<'a>(
    counter: &TokenCounter,
    text: &'a str,
    max_tokens: u32,
    add_ellipsis: bool,
) -> Cow<'a, str> {
    if max_tokens == 0 {
        return Cow::Borrowed("");
    }
    if counter.count(text) <= max_tokens {
        return Cow::Borrowed(text);
    }

    let suffix = if add_ellipsis { ELLIPSIS } else { "" };
    let mut target = if add_ellipsis {
        max_tokens.saturating_sub(ELLIPSIS_RESERVE)
    } else {
        max_tokens
    };

    loop {
        let end = longest_fitting_prefix(counter, text, target);
        let head = text[..end].trim_end();
        if head.is_empty() {
            if !suffix.is_empty() && counter.count(suffix) <= max_tokens {
                return Cow::Borrowed(suffix);
            }
            return Cow::Borrowed("");
        }

        let candidate = format!("{head}{suffix}");
        let tokens = counter.count(&candidate);
        if tokens <= max_tokens {
            tracing::debug!(
                max_tokens,
                tokens,
                kept_bytes = head.len(),
                original_bytes = text.len(),
                "Truncated text"
            );
            return Cow::Owned(candidate);
        }

        // Merging across the cut pushed the count over; shrink and retry.
        if target == 0 {
            return Cow::Borrowed("");
        }
        target -= 1;
    }
}

/// [`truncate`] with the ellipsis marker.
#[must_use]
pub fn truncate_with_ellipsis<'a>(
    counter: &TokenCounter,
    text: &'a str,
    max_tokens: u32,
) -> Cow<'a, str> {
    truncate(counter, text, max_tokens, true)
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{ELLIPSIS, longest_fitting_prefix, truncate, truncate_with_ellipsis};
    use crate::{TokenCounter, Tokenizer, TokenizerError};

    /// One token per whitespace-separated word.
    struct WordTokenizer;

    impl Tokenizer for WordTokenizer {
        fn encode_len(&self, text: &str) -> Result<usize, TokenizerError> {
            Ok(text.split_whitespace().count())
        }

        fn name(&self) -> &str {
            "words"
        }
    }

    fn words() -> TokenCounter {
        TokenCounter::with_tokenizer(Arc::new(WordTokenizer))
    }

    /// Word tokenizer that remembers the longest input it measured.
    #[derive(Default)]
    struct RecordingTokenizer {
        longest: AtomicUsize,
    }

    impl Tokenizer for RecordingTokenizer {
        fn encode_len(&self, text: &str) -> Result<usize, TokenizerError> {
            self.longest.fetch_max(text.len(), Ordering::Relaxed);
            Ok(text.split_whitespace().count())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn sample_text() -> String {
        (0..400)
            .map(|i| format!("Sentence number {i} describes part of the project."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    mod prefix {
        use super::*;

        #[test]
        fn whole_text_when_it_fits() {
            let counter = words();
            assert_eq!(longest_fitting_prefix(&counter, "a b c", 3), 5);
        }

        #[test]
        fn stops_before_next_word() {
            let counter = words();
            let text = "alpha beta gamma delta";
            let end = longest_fitting_prefix(&counter, text, 2);
            // "alpha beta " still counts as two words.
            assert_eq!(&text[..end], "alpha beta ");
        }

        #[test]
        fn respects_char_boundaries() {
            let counter = TokenCounter::new();
            let text = "日本語のテキスト ".repeat(200);
            let end = longest_fitting_prefix(&counter, &text, 50);
            assert!(text.is_char_boundary(end));
            assert!(counter.count(&text[..end]) <= 50);
        }

        #[test]
        fn long_text_is_measured_only_near_the_limit() {
            let recorder = Arc::new(RecordingTokenizer::default());
            let counter = TokenCounter::with_tokenizer(recorder.clone());
            let text = (0..100_000)
                .map(|i| format!("w{i}"))
                .collect::<Vec<_>>()
                .join(" ");

            let end = longest_fitting_prefix(&counter, &text, 10);

            assert_eq!(text[..end].split_whitespace().count(), 10);
            assert!(text[end..].starts_with("w10 "));
            assert!(recorder.longest.load(Ordering::Relaxed) <= 320);
        }

        #[test]
        fn window_grows_when_it_fits_entirely() {
            let counter = words();
            let word = "x".repeat(50);
            let text = [word.as_str(); 6].join(" ");

            // The first 64-char window holds only two words, which fit.
            let end = longest_fitting_prefix(&counter, &text, 2);
            assert_eq!(end, 102);
        }

        #[test]
        fn zero_limit_keeps_nothing_with_content() {
            let counter = words();
            assert_eq!(longest_fitting_prefix(&counter, "word", 0), 0);
        }
    }

    mod bounded {
        use super::*;

        #[test]
        fn fitting_text_is_borrowed_unchanged() {
            let counter = TokenCounter::new();
            let text = "short text";
            let out = truncate(&counter, text, 100, true);
            assert!(matches!(out, Cow::Borrowed(_)));
            assert_eq!(out, text);
        }

        #[test]
        fn zero_budget_yields_empty() {
            let counter = TokenCounter::new();
            assert_eq!(truncate(&counter, "anything at all", 0, true), "");
            assert_eq!(truncate(&counter, "", 0, false), "");
        }

        #[test]
        fn appends_ellipsis_after_trimmed_prefix() {
            let counter = words();
            let out = truncate(&counter, "one two three four five six seven", 5, true);
            // Target is 5 - 3 = 2 words; "two" absorbs the ellipsis.
            assert_eq!(out, "one two...");
        }

        #[test]
        fn without_ellipsis_keeps_full_budget() {
            let counter = words();
            let out = truncate(&counter, "one two three four five six", 4, false);
            assert_eq!(out, "one two three four");
        }

        #[test]
        fn bound_is_exact_with_real_tokenizer() {
            let counter = TokenCounter::new();
            let text = sample_text();
            for max in [4, 5, 17, 100, 999] {
                let out = truncate_with_ellipsis(&counter, &text, max);
                assert!(counter.count(&out) <= max, "max {max}: {}", counter.count(&out));
                assert!(out.ends_with(ELLIPSIS));
            }
        }

        #[test]
        fn idempotent() {
            let counter = TokenCounter::new();
            let text = sample_text();
            for max in [4, 64, 500] {
                let once = truncate(&counter, &text, max, true).into_owned();
                let twice = truncate(&counter, &once, max, true);
                assert_eq!(twice, once);
            }
        }

        #[test]
        fn single_oversized_word_reduces_to_ellipsis() {
            let counter = TokenCounter::new();
            let text = "x".repeat(4_000);
            let out = truncate(&counter, &text, 4, true);
            assert!(counter.count(&out) <= 4);
        }
    }
}
