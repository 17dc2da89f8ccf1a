//! Pure transforms over a workflow's extra data.
//!
//! Everything here takes the payload by reference and never touches the
//! store; callers run these inside `StateStore::apply` (or `query` for the
//! read-only ones) so each change is a single read-modify-write.
//!
//! Layout of the payload:
//!
//! ```text
//! {
//!   "drafts":      { "<position key>": Draft, ... },
//!   "preingested": { "<field>": value, ... },
//!   ...task-defined keys
//! }
//! ```

use super::types::{Draft, DraftStatus, DraftTarget};
use crate::error::{Result, WorkflowError};
use crate::workflow::Position;
use serde_json::{Map, Value};

pub const DRAFTS_KEY: &str = "drafts";
pub const PREINGESTED_KEY: &str = "preingested";

fn as_object_mut<'a>(value: &'a mut Value, what: &str) -> Result<&'a mut Map<String, Value>> {
    if value.is_null() {
        *value = Value::Object(Map::new());
    }
    value
        .as_object_mut()
        .ok_or_else(|| WorkflowError::validation(format!("{what} must be a JSON object")))
}

/// The `drafts` map, created on first use
fn drafts_mut(data: &mut Value) -> Result<&mut Map<String, Value>> {
    let root = as_object_mut(data, "extra data")?;
    let drafts = root
        .entry(DRAFTS_KEY)
        .or_insert_with(|| Value::Object(Map::new()));
    as_object_mut(drafts, "drafts")
}

fn drafts(data: &Value) -> Option<&Map<String, Value>> {
    data.get(DRAFTS_KEY).and_then(Value::as_object)
}

/// Key of the draft at the maximal position; keys that are not positions
/// are ignored.
fn latest_key(drafts: &Map<String, Value>) -> Option<(Position, &str)> {
    drafts
        .keys()
        .filter_map(|key| Position::parse_key(key).map(|pos| (pos, key.as_str())))
        .max_by(|a, b| a.0.cmp(&b.0))
}

fn target_key(drafts: &Map<String, Value>, target: &DraftTarget) -> Option<String> {
    match target {
        DraftTarget::Latest => latest_key(drafts).map(|(_, key)| key.to_string()),
        DraftTarget::At(position) => {
            let key = position.to_key();
            drafts.contains_key(&key).then_some(key)
        }
    }
}

fn target_missing(target: &DraftTarget) -> WorkflowError {
    match target {
        DraftTarget::Latest => WorkflowError::not_found("draft"),
        DraftTarget::At(position) => WorkflowError::not_found(format!("draft at {position}")),
    }
}

/// Decode, mutate and re-encode one draft in place
fn update_draft<T>(
    data: &mut Value,
    target: &DraftTarget,
    update: impl FnOnce(&mut Draft) -> Result<T>,
) -> Result<T> {
    let drafts = drafts_mut(data)?;
    let key = target_key(drafts, target).ok_or_else(|| target_missing(target))?;
    let slot = drafts
        .get_mut(&key)
        .ok_or_else(|| target_missing(target))?;

    let mut draft: Draft = serde_json::from_value(slot.clone())?;
    let output = update(&mut draft)?;
    *slot = serde_json::to_value(&draft)?;
    Ok(output)
}

/// Insert `draft` at `position` unless a draft is already there.
///
/// Returns whether anything was inserted. Re-adding is a no-op, so a unit
/// that is re-executed after a resume does not clobber submitted values.
pub fn add_draft(data: &mut Value, position: &Position, draft: &Draft) -> Result<bool> {
    let drafts = drafts_mut(data)?;
    let key = position.to_key();
    if drafts.contains_key(&key) {
        return Ok(false);
    }
    drafts.insert(key, serde_json::to_value(draft)?);
    Ok(true)
}

/// Draft with the maximal position, regardless of insertion order
pub fn latest_draft(data: &Value) -> Result<Option<(Position, Draft)>> {
    let Some(drafts) = drafts(data) else {
        return Ok(None);
    };
    match latest_key(drafts) {
        Some((position, key)) => {
            let draft = serde_json::from_value(drafts[key].clone())?;
            Ok(Some((position, draft)))
        }
        None => Ok(None),
    }
}

pub fn draft_at(data: &Value, position: &Position) -> Result<Option<Draft>> {
    drafts(data)
        .and_then(|drafts| drafts.get(&position.to_key()))
        .map(|raw| serde_json::from_value(raw.clone()).map_err(WorkflowError::from))
        .transpose()
}

/// All drafts ordered by position
pub fn all_drafts(data: &Value) -> Result<Vec<(Position, Draft)>> {
    let Some(drafts) = drafts(data) else {
        return Ok(Vec::new());
    };
    let mut ordered = drafts
        .iter()
        .filter_map(|(key, raw)| Position::parse_key(key).map(|pos| (pos, raw)))
        .map(|(pos, raw)| -> Result<(Position, Draft)> {
            Ok((pos, serde_json::from_value(raw.clone())?))
        })
        .collect::<Result<Vec<_>>>()?;
    ordered.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(ordered)
}

/// Set one value inside a draft's `values` and refresh its timestamp
pub fn set_draft_field(
    data: &mut Value,
    target: &DraftTarget,
    field: &str,
    value: Value,
) -> Result<()> {
    update_draft(data, target, |draft| {
        draft.values.insert(field.to_string(), value);
        draft.touch();
        Ok(())
    })
}

/// Merge several values into a draft at once
pub fn merge_draft_values(
    data: &mut Value,
    target: &DraftTarget,
    values: &Map<String, Value>,
) -> Result<()> {
    update_draft(data, target, |draft| {
        for (field, value) in values {
            draft.values.insert(field.clone(), value.clone());
        }
        draft.touch();
        Ok(())
    })
}

pub fn set_draft_status(data: &mut Value, target: &DraftTarget, status: DraftStatus) -> Result<()> {
    update_draft(data, target, |draft| {
        draft.status = status;
        draft.touch();
        Ok(())
    })
}

/// Append to a multi-value field of the latest draft.
///
/// Absent field becomes `[value]`, a scalar `x` becomes `[x, value]`, a
/// list gets `value` pushed.
pub fn append_draft_list_field(data: &mut Value, field: &str, value: Value) -> Result<()> {
    update_draft(data, &DraftTarget::Latest, |draft| {
        append_value(&mut draft.values, field, value);
        draft.touch();
        Ok(())
    })
}

/// Value of one field of the latest draft
pub fn draft_field(data: &Value, field: &str) -> Result<Option<Value>> {
    Ok(latest_draft(data)?.and_then(|(_, draft)| draft.values.get(field).cloned()))
}

/// Implicit multi-value append shared by drafts and preingested data
pub fn append_value(values: &mut Map<String, Value>, field: &str, value: Value) {
    match values.get_mut(field) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let previous = existing.take();
            *existing = Value::Array(vec![previous, value]);
        }
        None => {
            values.insert(field.to_string(), Value::Array(vec![value]));
        }
    }
}

/// Stage values before a run; `append` merges with the list policy of
/// [`append_value`], otherwise values overwrite.
pub fn preingest(data: &mut Value, values: &Map<String, Value>, append: bool) -> Result<()> {
    let root = as_object_mut(data, "extra data")?;
    let staged = root
        .entry(PREINGESTED_KEY)
        .or_insert_with(|| Value::Object(Map::new()));
    let staged = as_object_mut(staged, "preingested data")?;

    for (field, value) in values {
        if append {
            append_value(staged, field, value.clone());
        } else {
            staged.insert(field.clone(), value.clone());
        }
    }
    Ok(())
}

/// Preingested value for `key`, or the whole staged map when `key` is `None`
pub fn preingested(data: &Value, key: Option<&str>) -> Option<Value> {
    let staged = data.get(PREINGESTED_KEY)?;
    match key {
        Some(key) => staged.get(key).cloned(),
        None => Some(staged.clone()),
    }
}

/// Values of every draft merged in position order; later steps win
pub fn record_values(data: &Value) -> Result<Map<String, Value>> {
    let mut record = Map::new();
    for (_, draft) in all_drafts(data)? {
        record.extend(draft.values);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft(kind: &str, values: Value) -> Draft {
        Draft::new(kind, values.as_object().cloned().unwrap_or_default())
    }

    fn pos(indices: &[usize]) -> Position {
        Position::new(indices.to_vec())
    }

    #[test]
    fn test_add_draft_is_idempotent() {
        let mut data = json!({});
        let first = draft("ArticleForm", json!({"title": "A"}));

        assert!(add_draft(&mut data, &pos(&[1]), &first).unwrap());
        let after_first = data.clone();

        let second = draft("ArticleForm", json!({"title": "B"}));
        assert!(!add_draft(&mut data, &pos(&[1]), &second).unwrap());
        assert_eq!(data, after_first);
    }

    #[test]
    fn test_latest_draft_ignores_insertion_order() {
        let mut data = json!({});
        add_draft(&mut data, &pos(&[2]), &draft("C", json!({"n": 2}))).unwrap();
        add_draft(&mut data, &pos(&[0]), &draft("A", json!({"n": 0}))).unwrap();
        add_draft(&mut data, &pos(&[1]), &draft("B", json!({"n": 1}))).unwrap();

        let (position, latest) = latest_draft(&data).unwrap().unwrap();
        assert_eq!(position, pos(&[2]));
        assert_eq!(latest.kind, "C");
        assert_eq!(latest.values["n"], json!(2));
    }

    #[test]
    fn test_latest_draft_compares_positions_not_strings() {
        let mut data = json!({});
        add_draft(&mut data, &pos(&[9]), &draft("nine", json!({}))).unwrap();
        add_draft(&mut data, &pos(&[10]), &draft("ten", json!({}))).unwrap();
        add_draft(&mut data, &pos(&[3, 1]), &draft("nested", json!({}))).unwrap();

        let (position, latest) = latest_draft(&data).unwrap().unwrap();
        assert_eq!(position, pos(&[10]));
        assert_eq!(latest.kind, "ten");
    }

    #[test]
    fn test_no_drafts_is_none() {
        assert!(latest_draft(&json!({})).unwrap().is_none());
        assert!(draft_at(&json!({}), &pos(&[0])).unwrap().is_none());
        assert!(draft_field(&json!({}), "title").unwrap().is_none());
    }

    #[test]
    fn test_set_field_on_latest_and_specific() {
        let mut data = json!({});
        add_draft(&mut data, &pos(&[0]), &draft("A", json!({}))).unwrap();
        add_draft(&mut data, &pos(&[1]), &draft("B", json!({}))).unwrap();

        set_draft_field(&mut data, &DraftTarget::Latest, "title", json!("Latest")).unwrap();
        set_draft_field(&mut data, &pos(&[0]).into(), "title", json!("First")).unwrap();

        assert_eq!(draft_at(&data, &pos(&[1])).unwrap().unwrap().values["title"], json!("Latest"));
        assert_eq!(draft_at(&data, &pos(&[0])).unwrap().unwrap().values["title"], json!("First"));
    }

    #[test]
    fn test_set_field_without_draft_is_not_found() {
        let mut data = json!({});
        let err = set_draft_field(&mut data, &DraftTarget::Latest, "title", json!("x")).unwrap_err();
        assert!(err.is_not_found());

        add_draft(&mut data, &pos(&[0]), &draft("A", json!({}))).unwrap();
        let err = set_draft_field(&mut data, &pos(&[4]).into(), "title", json!("x")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_append_list_field_polymorphism() {
        let mut data = json!({});
        add_draft(
            &mut data,
            &pos(&[0]),
            &draft("A", json!({"keywords": "physics", "files": ["a.pdf"]})),
        )
        .unwrap();

        append_draft_list_field(&mut data, "authors", json!("Ellis")).unwrap();
        append_draft_list_field(&mut data, "keywords", json!("hep")).unwrap();
        append_draft_list_field(&mut data, "files", json!("b.pdf")).unwrap();

        let values = latest_draft(&data).unwrap().unwrap().1.values;
        assert_eq!(values["authors"], json!(["Ellis"]));
        assert_eq!(values["keywords"], json!(["physics", "hep"]));
        assert_eq!(values["files"], json!(["a.pdf", "b.pdf"]));
    }

    #[test]
    fn test_status_update() {
        let mut data = json!({});
        add_draft(&mut data, &pos(&[1]), &draft("A", json!({}))).unwrap();
        assert!(!latest_draft(&data).unwrap().unwrap().1.is_finished());

        set_draft_status(&mut data, &DraftTarget::Latest, DraftStatus::Finished).unwrap();
        assert!(latest_draft(&data).unwrap().unwrap().1.is_finished());
    }

    #[test]
    fn test_preingest_overwrite_and_append() {
        let mut data = json!({});
        let values = json!({"title": "One", "files": {"name": "a.pdf"}});
        preingest(&mut data, values.as_object().unwrap(), false).unwrap();
        assert_eq!(preingested(&data, Some("title")), Some(json!("One")));

        let more = json!({"files": {"name": "b.pdf"}});
        preingest(&mut data, more.as_object().unwrap(), true).unwrap();
        assert_eq!(
            preingested(&data, Some("files")),
            Some(json!([{"name": "a.pdf"}, {"name": "b.pdf"}]))
        );
        assert!(preingested(&json!({}), None).is_none());
    }

    #[test]
    fn test_record_values_merges_in_position_order() {
        let mut data = json!({});
        add_draft(&mut data, &pos(&[3]), &draft("B", json!({"title": "Final", "year": 2013}))).unwrap();
        add_draft(&mut data, &pos(&[1]), &draft("A", json!({"title": "Draft", "lang": "en"}))).unwrap();

        let record = record_values(&data).unwrap();
        assert_eq!(record["title"], json!("Final"));
        assert_eq!(record["lang"], json!("en"));
        assert_eq!(record["year"], json!(2013));
    }

    #[test]
    fn test_non_object_drafts_rejected() {
        let mut data = json!({"drafts": [1, 2]});
        let err = add_draft(&mut data, &pos(&[0]), &draft("A", json!({}))).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation { .. }));
    }
}
