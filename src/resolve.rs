//! Dotted-path lookup over heterogeneous structured values.
//!
//! The resolver never looks at concrete host types.  Anything that wants to
//! be traversed implements [`Structured`], which classifies a value into a
//! [`Shape`] and exposes field/key lookup.  Template values (records and
//! decoded JSON alike) implement it, so every grouping function shares the
//! same traversal rules.

use std::fmt;

use log::warn;

/// The structural kind of a value, as far as path resolution cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Named fields, looked up by exact (case-sensitive) field name.
    Record,
    /// Dynamic key/value mapping.
    Map,
    Sequence,
    Scalar,
    Absent,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shape::Record => "record",
            Shape::Map => "map",
            Shape::Sequence => "sequence",
            Shape::Scalar => "scalar",
            Shape::Absent => "absent value",
        };
        f.write_str(name)
    }
}

pub trait Structured: Clone {
    fn shape(&self) -> Shape;

    /// Field lookup on a [`Shape::Record`].
    fn field(&self, name: &str) -> Option<Self>;

    /// Key lookup on a [`Shape::Map`].
    fn entry(&self, key: &str) -> Option<Self>;
}

/// Resolve `path` (segments separated by `.`) against `value`.
///
/// An empty path yields the input unchanged.  A missing field or key yields
/// `None` silently; stepping into a scalar or sequence also yields `None`
/// but logs a diagnostic, since that usually means a typo in a template.
pub fn resolve<T: Structured>(value: &T, path: &str) -> Option<T> {
    if path.is_empty() {
        return Some(value.clone());
    }

    let (segment, rest) = path.split_once('.').unwrap_or((path, ""));
    let next = match value.shape() {
        Shape::Record => value.field(segment),
        Shape::Map => value.entry(segment),
        shape => {
            warn!("cannot resolve further into path segment `{segment}` on unsupported type {shape}");
            None
        }
    }?;

    resolve(&next, rest)
}

#[cfg(test)]
impl Structured for serde_json::Value {
    fn shape(&self) -> Shape {
        match self {
            serde_json::Value::Object(_) => Shape::Map,
            serde_json::Value::Array(_) => Shape::Sequence,
            serde_json::Value::Null => Shape::Absent,
            _ => Shape::Scalar,
        }
    }

    fn field(&self, _name: &str) -> Option<Self> {
        None
    }

    fn entry(&self, key: &str) -> Option<Self> {
        self.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_keys() {
        let value = json!({"a": {"b": "x"}});
        assert_eq!(resolve(&value, "a.b"), Some(json!("x")));
    }

    #[test]
    fn missing_key_is_absent() {
        let value = json!({"a": {"b": "x"}});
        assert_eq!(resolve(&value, "a.c"), None);
        assert_eq!(resolve(&value, "z"), None);
    }

    #[test]
    fn empty_path_returns_input() {
        let value = json!({"a": 1});
        assert_eq!(resolve(&value, ""), Some(value.clone()));
    }

    #[test]
    fn scalars_and_sequences_do_not_resolve() {
        assert_eq!(resolve(&json!(5), "a"), None);
        assert_eq!(resolve(&json!([1, 2]), "0"), None);
        assert_eq!(resolve(&json!({"a": "x"}), "a.b"), None);
    }

    #[test]
    fn keys_are_case_sensitive() {
        let value = json!({"Image": "nginx"});
        assert_eq!(resolve(&value, "image"), None);
        assert_eq!(resolve(&value, "Image"), Some(json!("nginx")));
    }
}
