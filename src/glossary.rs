//! Dictionary files: plain-text term lists in two grammars.
//!
//! Pre/post dictionaries are mechanical rewrites applied to sources before
//! dispatch and to targets after validation. The model-facing dictionary is
//! never substituted; matching terms are shown to the model inside the prompt.
use eyre::{Result, eyre};
use std::path::PathBuf;


/// A `src->dst` pair, applied by plain string replacement in listed order.
#[derive(Debug, Clone, PartialEq)]
pub struct Rewrite {
    pub source: String,
    pub target: String,
}

/// A model-facing term, optionally annotated for the model's benefit.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub source: String,
    pub target: String,
    pub description: Option<String>,
}

/// Source-side cleanups, on unless `--no-builtin-pre-dict`.
pub const BUILTIN_PRE_DICT: &str = "\
// Normalize ellipsis spellings before the model sees them.
。。。->……
・・・->……
";

/// Target-side cleanups, on unless `--no-builtin-post-dict`.
pub const BUILTIN_POST_DICT: &str = "\
// Widen stray half-width punctuation in the Chinese output.
...->……
?->？
!->！
";

/// Default model-facing terms, on unless `--no-builtin-gpt-dict`.
pub const BUILTIN_GPT_DICT: &str = "\
// Terms handed to the model whenever they occur in a batch.
お兄ちゃん->哥哥 #亲昵的称呼
お姉ちゃん->姐姐 #亲昵的称呼
先輩->前辈
";

fn significant_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("//"))
}

/// Parse the rewrite grammar: `src->dst`, `//` comments, other lines skipped.
pub fn parse_rewrites(text: &str) -> Vec<Rewrite> {
    significant_lines(text)
        .filter_map(|line| line.split_once("->"))
        .map(|(source, target)| Rewrite {
            source: source.trim().to_string(),
            target: target.trim().to_string(),
        })
        .collect()
}

/// Split a model-facing line at its first unescaped `->`, un-escaping `\->`
/// in the source half.
fn split_arrow(line: &str) -> Option<(String, &str)> {
    let bytes = line.as_bytes();
    let mut from = 0;
    while let Some(at) = line[from..].find("->").map(|p| p + from) {
        if at > 0 && bytes[at - 1] == b'\\' {
            from = at + 2;
            continue;
        }
        let source = line[..at].replace("\\->", "->");
        return Some((source, &line[at + 2..]));
    }
    None
}

/// Parse the model-facing grammar: `src->dst` or `src->dst #description`.
pub fn parse_terms(text: &str) -> Vec<Term> {
    significant_lines(text)
        .filter_map(split_arrow)
        .map(|(source, rest)| {
            let (target, description) = match rest.split_once(" #") {
                Some((target, description)) => (target, Some(description.trim().to_string())),
                None => (rest, None),
            };
            Term {
                source: source.trim().to_string(),
                target: target.trim().to_string(),
                description,
            }
        })
        .collect()
}

/// Concatenate the builtin dictionary (when enabled) and every listed file.
pub async fn load_rewrites(builtin: Option<&str>, paths: &[PathBuf]) -> Result<Vec<Rewrite>> {
    let mut rewrites = builtin.map(parse_rewrites).unwrap_or_default();
    for path in paths {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("reading dictionary {}: {e}", path.display()))?;
        rewrites.extend(parse_rewrites(&text));
    }
    Ok(rewrites)
}

/// Like [`load_rewrites`], for the model-facing grammar.
pub async fn load_terms(builtin: Option<&str>, paths: &[PathBuf]) -> Result<Vec<Term>> {
    let mut terms = builtin.map(parse_terms).unwrap_or_default();
    for path in paths {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("reading dictionary {}: {e}", path.display()))?;
        terms.extend(parse_terms(&text));
    }
    Ok(terms)
}

/// Apply every pair to `text`, in listed order.
pub fn apply_rewrites(rewrites: &[Rewrite], text: &str) -> String {
    let mut text = text.to_string();
    for rule in rewrites {
        text = text.replace(&rule.source, &rule.target);
    }
    text
}
