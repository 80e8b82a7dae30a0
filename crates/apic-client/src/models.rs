//! APIC managed-object model
//!
//! Every managed object on the wire is a single-key JSON map from class name
//! to a body holding `attributes` and `children`:
//!
//! ```json
//! {"fvBD": {"attributes": {"dn": "uni/tn-common/BD-kube_bd"}, "children": []}}
//! ```
//!
//! [`ApicObject`] keeps attributes in a `BTreeMap` so the serialized form of
//! an object is deterministic, which the writer relies on when diffing.

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A managed object and its subtree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApicObject {
    pub class: String,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<ApicObject>,
}

/// The unit written under one label key
pub type ApicSlice = Vec<ApicObject>;

impl ApicObject {
    /// Create an object of `class` addressed by `dn`
    pub fn new(class: impl Into<String>, dn: impl Into<String>) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert("dn".to_string(), dn.into());
        Self {
            class: class.into(),
            attributes,
            children: Vec::new(),
        }
    }

    /// Distinguished name, empty when the object carries none
    pub fn dn(&self) -> &str {
        self.attr_str("dn")
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Attribute value, empty when unset
    pub fn attr_str(&self, key: &str) -> &str {
        self.attr(key).unwrap_or_default()
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Builder form of [`ApicObject::set_attr`]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn add_child(&mut self, child: ApicObject) {
        self.children.push(child);
    }

    /// Builder form of [`ApicObject::add_child`]
    pub fn with_child(mut self, child: ApicObject) -> Self {
        self.add_child(child);
        self
    }

    /// Direct children of the given class
    pub fn children_of<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a ApicObject> + 'a {
        self.children.iter().filter(move |c| c.class == class)
    }
}

#[derive(Serialize)]
struct BodyRef<'a> {
    attributes: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "no_children")]
    children: &'a [ApicObject],
}

fn no_children(children: &&[ApicObject]) -> bool {
    children.is_empty()
}

impl Serialize for ApicObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(
            &self.class,
            &BodyRef {
                attributes: &self.attributes,
                children: &self.children,
            },
        )?;
        map.end()
    }
}

#[derive(Deserialize)]
struct Body {
    #[serde(default)]
    attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    children: Vec<ApicObject>,
}

impl<'de> Deserialize<'de> for ApicObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: BTreeMap<String, Body> = BTreeMap::deserialize(deserializer)?;
        if raw.len() != 1 {
            return Err(de::Error::custom(format!(
                "managed object must have exactly one class key, found {}",
                raw.len()
            )));
        }
        let Some((class, body)) = raw.into_iter().next() else {
            return Err(de::Error::custom("empty managed object"));
        };
        // APIC encodes every attribute as a string; tolerate numbers and bools
        let attributes = body
            .attributes
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect();
        Ok(Self {
            class,
            attributes,
            children: body.children,
        })
    }
}

/// Envelope of every APIC query response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApicResponse {
    #[serde(rename = "totalCount", default)]
    pub total_count: String,
    #[serde(default)]
    pub imdata: Vec<ApicObject>,
}

impl ApicResponse {
    /// The APIC error carried in `imdata`, if any
    pub fn error_text(&self) -> Option<String> {
        self.imdata.iter().find(|o| o.class == "error").map(|e| {
            format!("{} (code {})", e.attr_str("text"), e.attr_str("code"))
        })
    }
}
