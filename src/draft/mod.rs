//! Drafts and the extra-data protocol
//!
//! A draft is one checkpoint of externally supplied input (typically a form
//! submission), stored in the workflow's extra data under the position of
//! the step that captures it.

mod protocol;
pub mod transforms;
mod types;

pub use protocol::{
    add_draft, all_drafts, append_draft_list_field, draft_at, draft_field, draft_status,
    get_extra_data, latest_draft, preingest, preingested, set_draft_field, set_draft_status,
    set_extra_data,
};
pub use types::{Draft, DraftStatus, DraftTarget};
