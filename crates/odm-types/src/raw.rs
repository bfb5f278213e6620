//! Raw stored documents.
//!
//! The storage engine speaks field maps keyed by storage key. Values are plain
//! JSON; references to other documents are stored as `{"$ref": .., "$id": ..}`.

use std::collections::BTreeMap;

use serde_json::Value;

/// A document as the storage engine holds it.
pub type RawDocument = BTreeMap<String, Value>;

/// Storage key holding a document's identifier.
pub const ID_KEY: &str = "_id";

/// Strip a leading namespace separator (`\` or `::`) from a type name.
///
/// Type names are compared and cached in their normalized form.
pub fn normalize_type_name(name: &str) -> &str {
    let name = name.trim_start_matches('\\');
    name.strip_prefix("::").unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_separators_are_stripped() {
        assert_eq!(normalize_type_name("\\App\\User"), "App\\User");
        assert_eq!(normalize_type_name("::app::User"), "app::User");
        assert_eq!(normalize_type_name("User"), "User");
    }
}
