//! Token counting using tiktoken.
//!
//! [`TokenCounter`] wraps an injected [`Tokenizer`] so the rest of the pipeline
//! can be driven by a deterministic fake in tests. The default tokenizer uses
//! tiktoken's `o200k_base` encoding, which is exact for current `OpenAI` models
//! and a close approximation for others:
//!
//! - **Claude models**: Anthropic uses a proprietary tokenizer; counts may vary by ~5-10%
//! - **Other models**: counts may vary; the safety-margin reservation absorbs the error
//!
//! Counting never fails. When the tokenizer is unavailable the counter falls
//! back to `ceil(chars / 4)` and reports [`CountSource::Estimated`].

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiktoken_rs::{CoreBPE, cl100k_base, o200k_base};

/// Characters per token assumed by the fallback estimate.
const FALLBACK_CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Error)]
pub enum TokenizerError {
    #[error("tokenizer encoding {0} could not be loaded")]
    Unavailable(&'static str),
    #[error("tokenizer rejected input: {0}")]
    Rejected(String),
}

/// A stateless text-to-token-count function.
pub trait Tokenizer: Send + Sync {
    fn encode_len(&self, text: &str) -> Result<usize, TokenizerError>;

    fn name(&self) -> &str;
}

/// BPE encodings shipped with tiktoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    O200kBase,
    Cl100kBase,
}

impl Encoding {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Encoding::O200kBase => "o200k_base",
            Encoding::Cl100kBase => "cl100k_base",
        }
    }
}

/// The tiktoken encoders are expensive to initialize (they load vocabulary
/// data), so each one is created once and shared by every tokenizer.
static O200K: OnceLock<Option<CoreBPE>> = OnceLock::new();
static CL100K: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn get_encoder(encoding: Encoding) -> Option<&'static CoreBPE> {
    match encoding {
        Encoding::O200kBase => O200K.get_or_init(|| o200k_base().ok()).as_ref(),
        Encoding::Cl100kBase => CL100K.get_or_init(|| cl100k_base().ok()).as_ref(),
    }
}

/// tiktoken-backed [`Tokenizer`].
#[derive(Clone, Copy)]
pub struct TiktokenTokenizer {
    encoding: Encoding,
    encoder: Option<&'static CoreBPE>,
}

impl std::fmt::Debug for TiktokenTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenTokenizer")
            .field("encoding", &self.encoding)
            .field("encoder", &self.encoder.as_ref().map(|_| "<CoreBPE>"))
            .finish()
    }
}

impl TiktokenTokenizer {
    #[must_use]
    pub fn new(encoding: Encoding) -> Self {
        let encoder = get_encoder(encoding);
        if encoder.is_none() {
            tracing::error!(
                encoding = encoding.as_str(),
                "Failed to initialize tiktoken encoder. Falling back to character estimates."
            );
        }
        Self { encoding, encoder }
    }
}

impl Default for TiktokenTokenizer {
    fn default() -> Self {
        Self::new(Encoding::default())
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode_len(&self, text: &str) -> Result<usize, TokenizerError> {
        let encoder = self
            .encoder
            .ok_or(TokenizerError::Unavailable(self.encoding.as_str()))?;
        Ok(encoder.encode_ordinary(text).len())
    }

    fn name(&self) -> &str {
        self.encoding.as_str()
    }
}

/// Whether a count came from the tokenizer or from the character estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountSource {
    Exact,
    Estimated,
}

/// Result of measuring a text.
///
/// This makes the "exact OR estimate" distinction explicit at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenMeasure {
    pub tokens: u32,
    pub source: CountSource,
}

/// Counts tokens with an injected tokenizer.
///
/// Cloning is cheap; clones share the same tokenizer.
///
/// # Example
///
/// ```
/// use condense_context::TokenCounter;
///
/// let counter = TokenCounter::new();
/// let tokens = counter.count("Hello, world!");
/// assert!(tokens > 0);
/// ```
#[derive(Clone)]
pub struct TokenCounter {
    tokenizer: Arc<dyn Tokenizer>,
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("tokenizer", &self.tokenizer.name())
            .finish()
    }
}

impl TokenCounter {
    /// Counter backed by tiktoken's default encoding.
    #[must_use]
    pub fn new() -> Self {
        Self::with_encoding(Encoding::default())
    }

    #[must_use]
    pub fn with_encoding(encoding: Encoding) -> Self {
        Self::with_tokenizer(Arc::new(TiktokenTokenizer::new(encoding)))
    }

    #[must_use]
    pub fn with_tokenizer(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }

    /// Counts the tokens in `text`, falling back to an estimate if the
    /// tokenizer fails.
    #[must_use]
    pub fn count(&self, text: &str) -> u32 {
        self.measure(text).tokens
    }

    /// Like [`count`](Self::count), but also reports where the number came from.
    #[must_use]
    pub fn measure(&self, text: &str) -> TokenMeasure {
        if text.is_empty() {
            return TokenMeasure {
                tokens: 0,
                source: CountSource::Exact,
            };
        }

        match self.tokenizer.encode_len(text) {
            Ok(len) => TokenMeasure {
                tokens: u32::try_from(len).unwrap_or(u32::MAX),
                source: CountSource::Exact,
            },
            Err(err) => {
                let tokens = estimate_tokens(text);
                tracing::warn!(
                    tokenizer = self.tokenizer.name(),
                    error = %err,
                    estimate = tokens,
                    "Tokenizer failed; using character estimate"
                );
                TokenMeasure {
                    tokens,
                    source: CountSource::Estimated,
                }
            }
        }
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// `ceil(chars / 4)`, the English-text rule of thumb.
#[must_use]
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(FALLBACK_CHARS_PER_TOKEN)).unwrap_or(u32::MAX)
}
