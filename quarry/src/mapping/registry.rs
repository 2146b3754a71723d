use super::{FieldType, Mappings, Property, ID_FIELD, TIMESTAMP_FIELD};
use parking_lot::RwLock;
use std::sync::Arc;

/// Per-index owner of the published mapping snapshot.
///
/// Readers clone the current `Arc` and never observe a partially applied
/// update; `set` normalizes a new set and swaps it in whole.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    current: RwLock<Arc<Mappings>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded from persisted mappings.
    pub fn with_mappings(mappings: Mappings) -> Self {
        let registry = Self::new();
        registry.set(mappings);
        registry
    }

    pub fn get(&self) -> Arc<Mappings> {
        self.current.read().clone()
    }

    /// Replace the mapping set.
    ///
    /// An empty set is ignored and leaves the prior snapshot in place; the
    /// return value reports whether the snapshot changed. Callers persist the
    /// index metadata after an accepted update.
    pub fn set(&self, mut mappings: Mappings) -> bool {
        if mappings.is_empty() {
            return false;
        }

        for prop in mappings.properties.values_mut() {
            if prop.field_type != FieldType::Text {
                prop.analyzer = None;
                prop.search_analyzer = None;
            }
        }
        mappings.insert(ID_FIELD, Property::new(FieldType::Keyword));
        mappings.insert(TIMESTAMP_FIELD, Property::new(FieldType::Time));

        *self.current.write() = Arc::new(mappings);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_set_is_noop() {
        let registry = SchemaRegistry::new();
        let mut mappings = Mappings::new();
        mappings.insert("title", Property::new(FieldType::Text));
        assert!(registry.set(mappings));
        let before = registry.get();

        assert!(!registry.set(Mappings::new()));
        assert_eq!(*registry.get(), *before);
    }

    #[test]
    fn test_reserved_fields_injected() {
        let registry = SchemaRegistry::new();
        let mut mappings = Mappings::new();
        mappings.insert("title", Property::new(FieldType::Text));
        registry.set(mappings);

        let current = registry.get();
        assert_eq!(current.get(ID_FIELD).map(|p| p.field_type), Some(FieldType::Keyword));
        assert_eq!(
            current.get(TIMESTAMP_FIELD).map(|p| p.field_type),
            Some(FieldType::Time)
        );
    }

    #[test]
    fn test_non_text_analyzers_cleared() {
        let registry = SchemaRegistry::new();
        let mut mappings = Mappings::new();
        mappings.insert(
            "status",
            Property::new(FieldType::Keyword)
                .with_analyzer("standard")
                .with_search_analyzer("simple"),
        );
        mappings.insert("title", Property::new(FieldType::Text).with_search_analyzer("simple"));
        registry.set(mappings);

        let current = registry.get();
        let status = current.get("status").expect("status");
        assert!(status.analyzer.is_none() && status.search_analyzer.is_none());
        let title = current.get("title").expect("title");
        assert_eq!(title.search_analyzer.as_deref(), Some("simple"));
    }

    #[test]
    fn test_snapshot_survives_update() {
        let registry = SchemaRegistry::new();
        let mut first = Mappings::new();
        first.insert("a", Property::new(FieldType::Numeric));
        registry.set(first);
        let snapshot = registry.get();

        let mut second = Mappings::new();
        second.insert("b", Property::new(FieldType::Bool));
        registry.set(second);

        assert!(snapshot.contains("a"));
        assert!(!registry.get().contains("a"));
    }

    fn field_type() -> impl Strategy<Value = FieldType> {
        prop_oneof![
            Just(FieldType::Text),
            Just(FieldType::Keyword),
            Just(FieldType::Numeric),
            Just(FieldType::Bool),
            Just(FieldType::Time),
        ]
    }

    proptest! {
        #[test]
        fn prop_set_get_round_trip(
            fields in proptest::collection::btree_map("[a-z]{1,8}(\\.[a-z]{1,6})?", (field_type(), any::<bool>()), 1..12)
        ) {
            let mut input = Mappings::new();
            for (name, (ty, with_analyzer)) in &fields {
                let mut prop = Property::new(*ty);
                if *with_analyzer {
                    prop = prop.with_analyzer("standard").with_search_analyzer("simple");
                }
                input.insert(name.clone(), prop);
            }

            let registry = SchemaRegistry::new();
            prop_assert!(registry.set(input.clone()));
            let output = registry.get();

            prop_assert_eq!(output.len(), input.len() + 2);
            for (name, prop) in input.iter() {
                let got = output.get(name).expect("field kept");
                prop_assert_eq!(got.field_type, prop.field_type);
                if prop.field_type == FieldType::Text {
                    prop_assert_eq!(&got.analyzer, &prop.analyzer);
                    prop_assert_eq!(&got.search_analyzer, &prop.search_analyzer);
                } else {
                    prop_assert!(got.analyzer.is_none());
                    prop_assert!(got.search_analyzer.is_none());
                }
            }
        }
    }
}
