//! What we tell the model to do: batch prompts with history, glossary and
//! placeholder framing.
use crate::glossary::Term;
use crate::placeholder::PlaceholderSet;
use crate::script::Entry;

mod tests;

/// The message that primes the model with its translator role.
pub const SYSTEM_PROMPT: &str = "你是一个视觉小说翻译模型，可以通顺地使用给定的术语表以指定的风格将日文翻译成简体中文，并联系上下文正确使用人称代词，注意不要混淆使役态和被动态的主语和宾语，不要擅自添加原文中没有的特殊符号，也不要擅自增加或减少换行。";

/// The user-message template; the three slots are filled per batch.
const USER_TEMPLATE: &str = "历史翻译：[History]
参考以下术语表（可为空，格式为src->dst #备注）：
[Glossary]
根据以上术语表的对应关系和备注，结合历史剧情和上下文，将下面的文本从日文翻译成简体中文：
[Input]";

/// Joins history entries inside `[History]`; distinct from the LF that
/// separates input lines.
const HISTORY_SEPARATOR: &str = "<SEP>";

/// Sampling knobs forwarded verbatim to the endpoint.
#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

/// Rewrite one translatable string for the wire: LF-normalized, newlines
/// swapped for the placeholder token, and speaker lines framed as
/// `speaker「body」` with inner corner quotes tokenized too.
fn transform(text: &str, speaker: Option<&str>, placeholders: &PlaceholderSet) -> String {
    let body = text
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\n', &placeholders.newline);
    match speaker {
        Some(name) => {
            let body = body
                .replace('「', &placeholders.quote_open)
                .replace('」', &placeholders.quote_close);
            format!("{name}「{body}」")
        }
        None => body,
    }
}

/// The batch's `[Input]` block: one transformed source per line.
fn input_block(batch: &[Entry], placeholders: &PlaceholderSet) -> String {
    batch
        .iter()
        .map(|entry| transform(&entry.source, entry.speaker.as_deref(), placeholders))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The `[History]` block: completed translations, with the translated
/// speaker name when one was recovered.
fn history_block(history: &[Entry], placeholders: &PlaceholderSet) -> String {
    history
        .iter()
        .filter_map(|entry| {
            let target = entry.target.as_deref()?;
            let display = entry
                .speaker
                .as_deref()
                .map(|original| entry.target_speaker.as_deref().unwrap_or(original));
            Some(transform(target, display, placeholders))
        })
        .collect::<Vec<_>>()
        .join(HISTORY_SEPARATOR)
}

/// The `[Glossary]` block: terms whose source occurs in the batch's raw text.
fn glossary_block(terms: &[Term], batch_text: &str) -> String {
    terms
        .iter()
        .filter(|term| batch_text.contains(&term.source))
        .map(|term| match &term.description {
            Some(description) => format!("{}->{} #{}", term.source, term.target, description),
            None => format!("{}->{}", term.source, term.target),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Assemble the user message for one batch.
pub fn assemble(
    batch: &[Entry],
    history: &[Entry],
    terms: &[Term],
    placeholders: &PlaceholderSet,
) -> String {
    let batch_text = batch
        .iter()
        .map(|entry| entry.source.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    USER_TEMPLATE
        .replace("[History]", &history_block(history, placeholders))
        .replace("[Glossary]", &glossary_block(terms, &batch_text))
        .replace("[Input]", &input_block(batch, placeholders))
}
