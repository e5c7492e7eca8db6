//! Built-in container payloads (spec §3.4, §3.5).

mod dict;
mod list;

pub use dict::DictObject;
pub use list::{MAX_LEN, ListObject};
