//! Custom field name translation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default property name of the custom field holding the source identifier.
const DEFAULT_FOREIGN_KEY_PROPERTY: &str = "sourceId";

/// Bidirectional mapping between readable property names and the system
/// names the remote store assigns to custom fields (`source_id_5a1f0c2e`).
///
/// Standard fields (`firstName`, `city`, …) map to themselves and need no
/// entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FieldMapSpec", into = "FieldMapSpec")]
pub struct FieldMap {
    foreign_key_property: String,
    to_system: BTreeMap<String, String>,
    to_property: BTreeMap<String, String>,
}

/// Serialized form: the reverse index is derived, not stored.
#[derive(Serialize, Deserialize)]
struct FieldMapSpec {
    #[serde(default = "default_foreign_key_property")]
    foreign_key_property: String,
    #[serde(default)]
    fields: BTreeMap<String, String>,
}

fn default_foreign_key_property() -> String {
    DEFAULT_FOREIGN_KEY_PROPERTY.to_string()
}

impl From<FieldMapSpec> for FieldMap {
    fn from(spec: FieldMapSpec) -> Self {
        let mut map = FieldMap::new(spec.foreign_key_property);
        for (property, system) in spec.fields {
            map.insert(property, system);
        }
        map
    }
}

impl From<FieldMap> for FieldMapSpec {
    fn from(map: FieldMap) -> Self {
        Self {
            foreign_key_property: map.foreign_key_property,
            fields: map.to_system,
        }
    }
}

impl FieldMap {
    /// Creates a map whose source identifier lives in `foreign_key_property`.
    pub fn new(foreign_key_property: impl Into<String>) -> Self {
        Self {
            foreign_key_property: foreign_key_property.into(),
            to_system: BTreeMap::new(),
            to_property: BTreeMap::new(),
        }
    }

    /// Adds a custom field translation.
    pub fn with_field(mut self, property: impl Into<String>, system: impl Into<String>) -> Self {
        self.insert(property, system);
        self
    }

    /// Adds a custom field translation, replacing any previous one for either name.
    pub fn insert(&mut self, property: impl Into<String>, system: impl Into<String>) {
        let property = property.into();
        let system = system.into();
        if let Some(old_system) = self.to_system.remove(&property) {
            self.to_property.remove(&old_system);
        }
        if let Some(old_property) = self.to_property.remove(&system) {
            self.to_system.remove(&old_property);
        }
        self.to_system.insert(property.clone(), system.clone());
        self.to_property.insert(system, property);
    }

    /// Property name of the source identifier field.
    pub fn foreign_key_property(&self) -> &str {
        &self.foreign_key_property
    }

    /// System name of the source identifier field.
    pub fn foreign_key_system_name(&self) -> &str {
        self.system_name(&self.foreign_key_property)
    }

    /// Translates a property name to its system name.
    pub fn system_name<'a>(&'a self, property: &'a str) -> &'a str {
        self.to_system
            .get(property)
            .map(String::as_str)
            .unwrap_or(property)
    }

    /// Translates a system name to its property name.
    pub fn property_name<'a>(&'a self, system: &'a str) -> &'a str {
        self.to_property
            .get(system)
            .map(String::as_str)
            .unwrap_or(system)
    }

    /// Returns true if `system` is a known custom field.
    pub fn is_custom(&self, system: &str) -> bool {
        self.to_property.contains_key(system)
    }
}

impl Default for FieldMap {
    fn default() -> Self {
        Self::new(DEFAULT_FOREIGN_KEY_PROPERTY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_both_ways() {
        let map = FieldMap::new("sourceId")
            .with_field("sourceId", "source_id_5a1f0c2e")
            .with_field("memberType", "member_type_77ab");

        assert_eq!(map.system_name("sourceId"), "source_id_5a1f0c2e");
        assert_eq!(map.property_name("member_type_77ab"), "memberType");
        assert_eq!(map.foreign_key_system_name(), "source_id_5a1f0c2e");
        assert!(map.is_custom("member_type_77ab"));
    }

    #[test]
    fn standard_fields_pass_through() {
        let map = FieldMap::default();
        assert_eq!(map.system_name("firstName"), "firstName");
        assert_eq!(map.property_name("firstName"), "firstName");
        assert_eq!(map.foreign_key_system_name(), "sourceId");
    }

    #[test]
    fn insert_replaces_stale_pairs() {
        let mut map = FieldMap::default().with_field("a", "sys_a");
        map.insert("a", "sys_b");
        assert_eq!(map.system_name("a"), "sys_b");
        assert_eq!(map.property_name("sys_a"), "sys_a");
        assert!(!map.is_custom("sys_a"));
    }

    #[test]
    fn deserialize_rebuilds_reverse_index() {
        let map = FieldMap::default().with_field("sourceId", "source_id_1");
        let json = serde_json::to_string(&map).unwrap();
        let back: FieldMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back.property_name("source_id_1"), "sourceId");
        assert_eq!(back, map);
    }

    #[test]
    fn deserialize_defaults() {
        let map: FieldMap = serde_json::from_str(r#"{"fields": {"memberType": "mt_1"}}"#).unwrap();
        assert_eq!(map.foreign_key_property(), "sourceId");
        assert_eq!(map.system_name("memberType"), "mt_1");
    }
}
