//! Work files: JSON arrays of script lines, translated in place.
use eyre::{Result, eyre};
use serde_json::Value;
use std::path::Path;

/// One line of script drawn from a work file; the unit of translation.
///
/// `index` is the entry's position in the file's array and stays stable for
/// the whole run; extra fields of the JSON object never travel through the
/// pipeline and are merged around on write-back.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub index: usize,
    pub source: String,
    pub speaker: Option<String>,
    pub target: Option<String>,
    pub target_speaker: Option<String>,
}

/// Load a work file as a raw JSON array, unknown fields intact.
pub async fn load_work_file(path: &Path) -> Result<Vec<Value>> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| eyre!("reading {}: {e}", path.display()))?;
    serde_json::from_slice(&bytes).map_err(|e| eyre!("parsing {}: {e}", path.display()))
}

/// Write the array back, pretty-printed.
pub async fn save_work_file(path: &Path, array: &[Value]) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(array)?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| eyre!("writing {}: {e}", path.display()))
}

/// Collect the entries that still need a translation: a non-empty trimmed
/// `source` and no `target` yet.
pub fn pending_entries(array: &[Value]) -> Vec<Entry> {
    array
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let source = item.get("source")?.as_str()?;
            if source.trim().is_empty() {
                return None;
            }
            let translated = match item.get("target") {
                None | Some(Value::Null) => false,
                Some(Value::String(existing)) => !existing.is_empty(),
                Some(_) => true,
            };
            if translated {
                return None;
            }
            Some(Entry {
                index,
                source: source.to_string(),
                speaker: item
                    .get("speaker")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                target: None,
                target_speaker: None,
            })
        })
        .collect()
}

/// Merge finished entries back into the array at their indices, inserting
/// `target` (and `target_speaker` where present) and touching nothing else.
pub fn merge_entries(array: &mut [Value], entries: &[Entry]) {
    for entry in entries {
        let Some(target) = &entry.target else {
            continue;
        };
        let Some(item) = array.get_mut(entry.index).and_then(Value::as_object_mut) else {
            continue;
        };
        item.insert("target".to_string(), Value::String(target.clone()));
        if let Some(speaker) = &entry.target_speaker {
            item.insert("target_speaker".to_string(), Value::String(speaker.clone()));
        }
    }
}
