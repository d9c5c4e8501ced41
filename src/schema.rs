use std::collections::{BTreeMap, BTreeSet};

/// Path metadata of a document model, handed to criteria and sort converters
/// so they can ignore fields the model does not know.
pub trait Schema: Send + Sync {
    fn resolves_path(&self, path: &str) -> bool;
}

/// A concrete schema: a collection name, its declared field paths and the
/// paths that reference documents in another collection.
#[derive(Debug, Clone, Default)]
pub struct SchemaDef {
    name: String,
    paths: BTreeSet<String>,
    refs: BTreeMap<String, String>,
}

impl SchemaDef {
    pub fn new(name: impl Into<String>) -> Self {
        let mut paths = BTreeSet::new();
        paths.insert("_id".to_string());
        Self {
            name: name.into(),
            paths,
            refs: BTreeMap::new(),
        }
    }

    pub fn field(mut self, path: impl Into<String>) -> Self {
        self.paths.insert(path.into());
        self
    }

    /// Declare `path` as a reference into the `collection` collection.
    pub fn reference(mut self, path: impl Into<String>, collection: impl Into<String>) -> Self {
        let path = path.into();
        self.paths.insert(path.clone());
        self.refs.insert(path, collection.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ref_target(&self, path: &str) -> Option<&str> {
        self.refs.get(path).map(String::as_str)
    }
}

impl Schema for SchemaDef {
    fn resolves_path(&self, path: &str) -> bool {
        // Nested paths resolve when any ancestor is declared as a field.
        let mut prefix = path;
        loop {
            if self.paths.contains(prefix) {
                return true;
            }
            match prefix.rfind('.') {
                Some(idx) => prefix = &prefix[..idx],
                None => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_and_nested_paths_resolve() {
        let schema = SchemaDef::new("customers")
            .field("name")
            .field("address")
            .reference("createdBy", "users");
        assert!(schema.resolves_path("_id"));
        assert!(schema.resolves_path("name"));
        assert!(schema.resolves_path("address.city"));
        assert!(schema.resolves_path("createdBy"));
        assert!(!schema.resolves_path("xxxx"));
        assert_eq!(schema.ref_target("createdBy"), Some("users"));
        assert_eq!(schema.ref_target("name"), None);
    }
}
