//! Draft protocol routed through the state store
//!
//! Each call is one `apply` (writes) or `query` (reads) against the
//! instance, so concurrent submissions for the same workflow serialize.

use super::transforms;
use super::types::{Draft, DraftStatus, DraftTarget};
use crate::error::Result;
use crate::store::StateStore;
use crate::workflow::Position;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Mutate the extra data of `id` through `transform`
pub fn set_extra_data<T, F>(store: &StateStore, id: Uuid, transform: F) -> Result<T>
where
    F: FnOnce(&mut Value) -> Result<T>,
{
    store.apply(id, transform)
}

/// Read the extra data of `id` through `query`
pub fn get_extra_data<T, F>(store: &StateStore, id: Uuid, query: F) -> Result<T>
where
    F: FnOnce(&Value) -> Result<T>,
{
    store.query(id, query)
}

/// Insert a draft unless one already occupies `position`
pub fn add_draft(store: &StateStore, id: Uuid, position: &Position, draft: &Draft) -> Result<bool> {
    let inserted = store.apply(id, |data| transforms::add_draft(data, position, draft))?;
    if inserted {
        tracing::debug!(workflow = %id, position = %position, kind = %draft.kind, "Added draft");
    }
    Ok(inserted)
}

pub fn latest_draft(store: &StateStore, id: Uuid) -> Result<Option<(Position, Draft)>> {
    store.query(id, transforms::latest_draft)
}

pub fn draft_at(store: &StateStore, id: Uuid, position: &Position) -> Result<Option<Draft>> {
    store.query(id, |data| transforms::draft_at(data, position))
}

pub fn all_drafts(store: &StateStore, id: Uuid) -> Result<Vec<(Position, Draft)>> {
    store.query(id, transforms::all_drafts)
}

/// Latest draft's status, `None` when the instance has no drafts
pub fn draft_status(store: &StateStore, id: Uuid) -> Result<Option<DraftStatus>> {
    Ok(latest_draft(store, id)?.map(|(_, draft)| draft.status))
}

pub fn set_draft_field(
    store: &StateStore,
    id: Uuid,
    target: &DraftTarget,
    field: &str,
    value: Value,
) -> Result<()> {
    store.apply(id, |data| transforms::set_draft_field(data, target, field, value))
}

pub fn set_draft_status(
    store: &StateStore,
    id: Uuid,
    target: &DraftTarget,
    status: DraftStatus,
) -> Result<()> {
    store.apply(id, |data| transforms::set_draft_status(data, target, status))
}

pub fn append_draft_list_field(store: &StateStore, id: Uuid, field: &str, value: Value) -> Result<()> {
    store.apply(id, |data| transforms::append_draft_list_field(data, field, value))
}

pub fn draft_field(store: &StateStore, id: Uuid, field: &str) -> Result<Option<Value>> {
    store.query(id, |data| transforms::draft_field(data, field))
}

/// Stage form data on an instance before it runs
pub fn preingest(store: &StateStore, id: Uuid, values: &Map<String, Value>, append: bool) -> Result<()> {
    store.apply(id, |data| transforms::preingest(data, values, append))
}

pub fn preingested(store: &StateStore, id: Uuid, key: Option<&str>) -> Result<Option<Value>> {
    store.query(id, |data| Ok(transforms::preingested(data, key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> (StateStore, Uuid) {
        let store = StateStore::open_in_memory().unwrap();
        let id = store.create("article", "1").unwrap();
        (store, id)
    }

    #[test]
    fn test_add_draft_twice_leaves_extra_data_unchanged() {
        let (store, id) = setup();
        let draft = Draft::new("ArticleForm", Map::new());
        let position = Position::new(vec![1]);

        assert!(add_draft(&store, id, &position, &draft).unwrap());
        let once = store.load(id).unwrap().extra_data;

        let other = Draft::new("OtherForm", Map::new());
        assert!(!add_draft(&store, id, &position, &other).unwrap());
        assert_eq!(store.load(id).unwrap().extra_data, once);
    }

    #[test]
    fn test_field_updates_round_trip_through_store() {
        let (store, id) = setup();
        add_draft(&store, id, &Position::new(vec![1]), &Draft::new("A", Map::new())).unwrap();

        set_draft_field(&store, id, &DraftTarget::Latest, "title", json!("Higgs")).unwrap();
        append_draft_list_field(&store, id, "authors", json!("Englert")).unwrap();
        append_draft_list_field(&store, id, "authors", json!("Brout")).unwrap();

        assert_eq!(draft_field(&store, id, "title").unwrap(), Some(json!("Higgs")));
        assert_eq!(
            draft_field(&store, id, "authors").unwrap(),
            Some(json!(["Englert", "Brout"]))
        );
        assert_eq!(draft_status(&store, id).unwrap(), Some(DraftStatus::Unfinished));

        set_draft_status(&store, id, &DraftTarget::Latest, DraftStatus::Finished).unwrap();
        assert_eq!(draft_status(&store, id).unwrap(), Some(DraftStatus::Finished));
    }

    #[test]
    fn test_missing_draft_leaves_store_untouched() {
        let (store, id) = setup();
        let before = store.load(id).unwrap();

        let err = set_draft_field(&store, id, &DraftTarget::Latest, "title", json!("x")).unwrap_err();
        assert!(err.is_not_found());

        let after = store.load(id).unwrap();
        assert_eq!(after.extra_data, before.extra_data);
        assert_eq!(after.version, before.version);
        assert_eq!(draft_status(&store, id).unwrap(), None);
    }

    #[test]
    fn test_generic_extra_data_access() {
        let (store, id) = setup();
        set_extra_data(&store, id, |data| {
            data["recid"] = json!(12);
            Ok(())
        })
        .unwrap();

        let recid = get_extra_data(&store, id, |data| Ok(data.get("recid").cloned())).unwrap();
        assert_eq!(recid, Some(json!(12)));
    }

    #[test]
    fn test_preingest_through_store() {
        let (store, id) = setup();
        let values = json!({"title": "Preset"});
        preingest(&store, id, values.as_object().unwrap(), false).unwrap();
        assert_eq!(preingested(&store, id, Some("title")).unwrap(), Some(json!("Preset")));
        assert_eq!(preingested(&store, id, Some("missing")).unwrap(), None);
    }
}
