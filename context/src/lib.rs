//! Token-exact budgeting primitives.
//!
//! This crate provides:
//! - Exact token counting via tiktoken, behind an injectable [`Tokenizer`]
//! - Model-specific context windows and the usable input budget
//! - Priority-weighted allocation of a budget across content categories
//! - Token-bounded truncation
//! - Boundary-preserving chunking with overlap
//!
//! Everything here is synchronous and side-effect-free apart from logging.
//!
//! # Architecture
//!
//! ```text
//! BudgetCalculator
//! ├── registry: ModelRegistry (context window + pricing per model)
//! └── reservations: Reservations (system prompt, response, safety margin)
//!
//! TokenCounter
//! └── tokenizer: Arc<dyn Tokenizer> (tiktoken by default)
//!     ├── truncate / longest_fitting_prefix
//!     └── chunk (ChunkOptions)
//! ```

mod allocation;
mod chunking;
mod model_limits;
mod token_counter;
mod truncation;

pub use allocation::allocate;
pub use chunking::{ChunkOptions, chunk};
pub use model_limits::{
    BudgetCalculator, ModelLimits, ModelLimitsSource, ModelRegistry, Reservations,
    ResolvedModelLimits,
};
pub use token_counter::{
    CountSource, Encoding, TiktokenTokenizer, TokenCounter, TokenMeasure, Tokenizer,
    TokenizerError, estimate_tokens,
};
pub use truncation::{ELLIPSIS, longest_fitting_prefix, truncate, truncate_with_ellipsis};
