//! Prompt construction for chunk summaries and summary combination.
//!
//! Each builder returns `(system_instruction, user_prompt)` for one call.

use std::fmt::Write;

use condense_types::ContentKind;

/// Builds the prompt that summarizes chunk `index` (0-based) of `count`.
pub fn chunk_prompt(
    kind: ContentKind,
    source_id: &str,
    index: usize,
    count: usize,
    text: &str,
    target_tokens: u32,
) -> (String, String) {
    let system_instruction = format!(
        r#"You condense material from a software project so that a later step can describe the project accurately.

REQUIREMENTS:
1. Preserve concrete facts: purpose, features, technologies, architecture, commands and notable design decisions
2. Preserve names of modules, types, files and dependencies that appear in the text
3. Drop boilerplate, license text, badges and repetition
4. Keep the summary under approximately {target_tokens} tokens
5. Do not speculate beyond the text

The text may start with a few words repeated from the previous part; do not summarize them twice.
Start directly with the content - do not include preamble like "This chunk..." or "Summary:"."#
    );

    let mut user_prompt = String::new();
    let _ = writeln!(
        user_prompt,
        "{} `{source_id}`, chunk {} of {count}:",
        kind.label(),
        index + 1
    );
    user_prompt.push('\n');
    user_prompt.push_str(text);

    (system_instruction, user_prompt)
}

/// Builds the prompt that merges consecutive summaries of one source.
///
/// `is_final` marks the call whose output becomes the unit's summary.
pub fn combine_prompt(
    kind: ContentKind,
    source_id: &str,
    summaries: &[String],
    target_tokens: u32,
    is_final: bool,
) -> (String, String) {
    let scope = if is_final {
        "a single final summary of the whole source"
    } else {
        "one summary covering all of the parts below"
    };
    let system_instruction = format!(
        r#"You merge partial summaries of a software project into {scope}.

REQUIREMENTS:
1. Keep every distinct fact; merge facts that repeat across parts
2. Keep the order in which topics first appear
3. Keep the summary under approximately {target_tokens} tokens
4. Write plain prose without headings

Start directly with the content - do not include preamble."#
    );

    let mut user_prompt = String::new();
    let _ = writeln!(
        user_prompt,
        "Summaries of consecutive parts of {} `{source_id}`:",
        kind.label()
    );
    for (i, summary) in summaries.iter().enumerate() {
        let _ = write!(user_prompt, "\n[Part {}]\n{}\n", i + 1, summary.trim());
    }

    (system_instruction, user_prompt)
}
