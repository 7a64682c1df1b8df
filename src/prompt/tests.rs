#![cfg(test)]

use super::*;

fn placeholders() -> PlaceholderSet {
    PlaceholderSet {
        newline: "<NL-1>".to_string(),
        quote_open: "<QS-2>".to_string(),
        quote_close: "<QE-3>".to_string(),
    }
}

fn entry(index: usize, source: &str, speaker: Option<&str>) -> Entry {
    Entry {
        index,
        source: source.to_string(),
        speaker: speaker.map(str::to_string),
        target: None,
        target_speaker: None,
    }
}

fn done(
    index: usize,
    source: &str,
    speaker: Option<&str>,
    target: &str,
    target_speaker: Option<&str>,
) -> Entry {
    Entry {
        index,
        source: source.to_string(),
        speaker: speaker.map(str::to_string),
        target: Some(target.to_string()),
        target_speaker: target_speaker.map(str::to_string),
    }
}

/// The block substituted into the `[Input]` slot, read back off the message.
fn input_of(user_message: &str) -> &str {
    user_message
        .rsplit_once("将下面的文本从日文翻译成简体中文：\n")
        .map(|(_, input)| input)
        .unwrap()
}

#[test]
fn newlines_become_the_placeholder_token() {
    let ph = placeholders();
    let message = assemble(&[entry(0, "一行目\n二行目", None)], &[], &[], &ph);
    assert_eq!(input_of(&message), "一行目<NL-1>二行目");
}

#[test]
fn carriage_returns_normalize_before_tokenizing() {
    let ph = placeholders();
    let message = assemble(&[entry(0, "a\r\nb\rc", None)], &[], &[], &ph);
    assert_eq!(input_of(&message), "a<NL-1>b<NL-1>c");
}

#[test]
fn speaker_lines_are_framed_and_inner_quotes_tokenized() {
    let ph = placeholders();
    let message = assemble(&[entry(0, "それは「秘密」です", Some("吹雪"))], &[], &[], &ph);
    assert_eq!(input_of(&message), "吹雪「それは<QS-2>秘密<QE-3>です」");
}

#[test]
fn batch_entries_each_take_one_line() {
    let ph = placeholders();
    let message = assemble(
        &[entry(0, "おはよう", None), entry(1, "さようなら", None)],
        &[],
        &[],
        &ph,
    );
    assert_eq!(input_of(&message), "おはよう\nさようなら");
}

#[test]
fn history_uses_targets_and_translated_speakers() {
    let ph = placeholders();
    let history = vec![
        done(0, "おはよう", Some("吹雪"), "早上好", Some("Fubuki")),
        done(1, "いい天気", None, "天气真好", None),
    ];
    let message = assemble(&[entry(2, "そうだね", None)], &history, &[], &ph);
    assert!(message.contains("历史翻译：Fubuki「早上好」<SEP>天气真好"));
}

#[test]
fn history_falls_back_to_the_original_speaker() {
    let ph = placeholders();
    let history = vec![done(0, "おはよう", Some("吹雪"), "早上好", None)];
    let message = assemble(&[entry(1, "うん", None)], &history, &[], &ph);
    assert!(message.contains("吹雪「早上好」"));
}

#[test]
fn glossary_is_filtered_to_terms_present_in_the_batch() {
    let ph = placeholders();
    let terms = vec![
        Term {
            source: "先輩".to_string(),
            target: "前辈".to_string(),
            description: None,
        },
        Term {
            source: "吹雪".to_string(),
            target: "吹雪".to_string(),
            description: Some("角色名".to_string()),
        },
    ];
    let message = assemble(&[entry(0, "吹雪、またね", None)], &[], &terms, &ph);
    assert!(message.contains("吹雪->吹雪 #角色名"));
    assert!(!message.contains("先輩->前辈"));
}

#[test]
fn tokenized_source_round_trips_without_a_speaker() {
    let ph = placeholders();
    let original = "一行目\n二行目\n三行目";
    let message = assemble(&[entry(0, original, None)], &[], &[], &ph);
    let restored = input_of(&message).replace(&ph.newline, "\n");
    assert_eq!(restored, original);
}
