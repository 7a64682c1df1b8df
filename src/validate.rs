//! Checks on an accumulated reply and its decomposition back into entries.
use crate::placeholder::PlaceholderSet;
use crate::script::Entry;


/// A reply that broke the per-batch contract.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Line count differs from the batch size and single-line recovery did
    /// not apply.
    CountMismatch { expected: usize, got: usize },
    /// A reply line was empty.
    EmptyLine,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::CountMismatch { expected, got } => {
                write!(f, "expected {expected} reply lines, got {got}")
            }
            ValidationError::EmptyLine => write!(f, "reply contained an empty line"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Split `reply` back into one translation per batch entry.
///
/// A batch of one tolerates a mis-counted reply: embedded newlines are
/// collapsed and the whole reply becomes the single translation.
pub fn split_reply(
    reply: &str,
    batch: &[Entry],
    placeholders: &PlaceholderSet,
) -> Result<Vec<Entry>, ValidationError> {
    let mut lines: Vec<String> = reply.lines().map(str::to_string).collect();
    let mut recovered = false;
    if lines.len() != batch.len() {
        if batch.len() == 1 {
            lines = vec![reply.replace(['\r', '\n'], "")];
            recovered = true;
        } else {
            return Err(ValidationError::CountMismatch {
                expected: batch.len(),
                got: lines.len(),
            });
        }
    }
    if !recovered && lines.iter().any(|line| line.is_empty()) {
        return Err(ValidationError::EmptyLine);
    }
    Ok(batch
        .iter()
        .zip(&lines)
        .map(|(entry, line)| reconstruct(entry, line, placeholders))
        .collect())
}

/// Restore placeholders and speaker framing for one entry.
fn reconstruct(entry: &Entry, line: &str, placeholders: &PlaceholderSet) -> Entry {
    let restored = line.replace(&placeholders.newline, "\n");
    let mut finished = entry.clone();
    if entry.speaker.is_some()
        && let Some((speaker, body)) = restored.split_once('「')
    {
        let body = match body.rfind('」') {
            Some(at) => &body[..at],
            None => body,
        };
        let body = body
            .replace(&placeholders.quote_open, "「")
            .replace(&placeholders.quote_close, "」");
        finished.target = Some(body);
        finished.target_speaker = Some(speaker.to_string());
    } else {
        finished.target = Some(restored);
    }
    finished
}

/// Repetition threshold against a prompt of `prompt_chars` characters.
fn repetition_threshold(prompt_chars: usize) -> usize {
    prompt_chars.max(30)
}

/// True when the running reply shows a degenerate tail: some short suffix
/// repeated back-to-back at least `threshold` times, or the reply growing
/// past 1.5x the text the model was shown. Both measures are in characters.
pub fn is_degenerate(reply: &str, prompt_chars: usize) -> bool {
    let chars: Vec<char> = reply.chars().collect();
    if chars.len() as f64 > prompt_chars as f64 * 1.5 {
        return true;
    }
    let threshold = repetition_threshold(prompt_chars);
    let mut suffix_len = 1;
    while suffix_len * threshold < chars.len() {
        let run = suffix_len * threshold;
        let suffix = &chars[chars.len() - suffix_len..];
        let tail = &chars[chars.len() - run..];
        if tail.chunks_exact(suffix_len).all(|chunk| chunk == suffix) {
            return true;
        }
        suffix_len += 1;
    }
    false
}
