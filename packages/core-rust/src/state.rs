//! Observable state trees and their conversion to and from plain snapshots.
//!
//! A store's live state is an [`Observable`] node: an ordered map of fields
//! where each field is either a plain [`Value`] leaf or a nested observable
//! node. Nodes carry explicit read-only and shallow flags, so the conversion
//! functions never have to guess what kind of node they are looking at.
//!
//! - [`unwrap`] produces a plain snapshot of a node, skipping read-only child
//!   nodes unless asked to include them.
//! - [`merge_into`] folds a restored snapshot back into a live node,
//!   recursing into writable child nodes and only replacing read-only ones
//!   when asked to.
//!
//! Nodes own their children, so a tree can never contain itself and both
//! conversions always terminate.

use std::collections::BTreeMap;

use crate::types::Value;

/// A field of an observable node.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// Plain leaf: primitive, array, or an unobserved map.
    Value(Value),
    /// Nested observable node.
    Node(Observable),
}

impl Field {
    /// Current plain value of the field, read-only parts included.
    #[must_use]
    pub fn get(&self) -> Value {
        match self {
            Field::Value(value) => value.clone(),
            Field::Node(node) => unwrap(node, true),
        }
    }

    /// Returns the nested node, if this field is one.
    #[must_use]
    pub fn as_node(&self) -> Option<&Observable> {
        match self {
            Field::Node(node) => Some(node),
            Field::Value(_) => None,
        }
    }
}

impl From<Value> for Field {
    fn from(value: Value) -> Self {
        Field::Value(value)
    }
}

impl From<Observable> for Field {
    fn from(node: Observable) -> Self {
        Field::Node(node)
    }
}

/// An observation-instrumented record.
///
/// Deep nodes wrap nested maps into child nodes; shallow nodes keep nested
/// maps as plain values. Read-only nodes refuse writes through [`set`].
///
/// [`set`]: Observable::set
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Observable {
    fields: BTreeMap<String, Field>,
    read_only: bool,
    shallow: bool,
}

impl Observable {
    /// Creates an empty, writable, deep node.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deep writable node mirroring `value`.
    #[must_use]
    pub fn reactive(value: &Value) -> Self {
        Self::wrap(value, false, false)
    }

    /// Shallow writable node mirroring `value`.
    #[must_use]
    pub fn shallow_reactive(value: &Value) -> Self {
        Self::wrap(value, false, true)
    }

    /// Deep read-only node mirroring `value`. Nested maps become read-only nodes too.
    #[must_use]
    pub fn readonly(value: &Value) -> Self {
        Self::wrap(value, true, false)
    }

    /// Read-only node whose nested maps stay plain values.
    #[must_use]
    pub fn shallow_readonly(value: &Value) -> Self {
        Self::wrap(value, true, true)
    }

    /// Non-map values produce an empty node.
    fn wrap(value: &Value, read_only: bool, shallow: bool) -> Self {
        let fields = value
            .as_map()
            .map(|entries| {
                entries
                    .iter()
                    .map(|(key, child)| {
                        let field = match child {
                            Value::Map(_) if !shallow => {
                                Field::Node(Self::wrap(child, read_only, false))
                            }
                            _ => Field::Value(child.clone()),
                        };
                        (key.clone(), field)
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            fields,
            read_only,
            shallow,
        }
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    #[must_use]
    pub fn is_shallow(&self) -> bool {
        self.shallow
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Field> {
        self.fields.get(key)
    }

    /// Mutable access to a nested writable node.
    pub fn node_mut(&mut self, key: &str) -> Option<&mut Observable> {
        match self.fields.get_mut(key) {
            Some(Field::Node(node)) if !node.read_only => Some(node),
            _ => None,
        }
    }

    /// Writes a field. Writes to a read-only node are ignored and return `false`.
    pub fn set(&mut self, key: impl Into<String>, field: impl Into<Field>) -> bool {
        let key = key.into();
        if self.read_only {
            tracing::warn!(key = %key, "write to read-only state node ignored");
            return false;
        }
        self.fields.insert(key, field.into());
        true
    }

    /// Iterates fields in key order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(key, field)| (key.as_str(), field))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Produces a plain snapshot of `node`.
///
/// Child nodes are unwrapped recursively. A read-only node, `node` itself
/// included, is omitted (or unwraps to an empty map) unless
/// `include_read_only` is set: the caller does not own that data and must
/// not persist a stale copy of it.
#[must_use]
pub fn unwrap(node: &Observable, include_read_only: bool) -> Value {
    let mut out = BTreeMap::new();
    if node.read_only && !include_read_only {
        return Value::Map(out);
    }
    for (key, field) in &node.fields {
        match field {
            Field::Node(child) if child.read_only && !include_read_only => {}
            Field::Node(child) => {
                out.insert(key.clone(), unwrap(child, include_read_only));
            }
            Field::Value(value) => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Map(out)
}

/// Folds a restored snapshot into a live node.
///
/// For every key of `incoming`:
/// - writable child node + map value: merge recursively;
/// - read-only child node: replaced wholesale by a read-only view of the
///   incoming value (keeping its shallowness), only if `overwrite_read_only`;
/// - anything else: the incoming value is assigned directly.
///
/// Keys of `live` missing from `incoming` are left alone. A non-map
/// `incoming` is ignored, and so is a read-only `live` node unless
/// `overwrite_read_only` is set.
pub fn merge_into(live: &mut Observable, incoming: &Value, overwrite_read_only: bool) {
    if live.read_only && !overwrite_read_only {
        return;
    }
    let Some(entries) = incoming.as_map() else {
        return;
    };
    for (key, value) in entries {
        match live.fields.get_mut(key) {
            Some(Field::Node(child)) if !child.read_only && value.as_map().is_some() => {
                merge_into(child, value, overwrite_read_only);
            }
            Some(Field::Node(child)) if child.read_only => {
                if overwrite_read_only {
                    let replacement = read_only_view(value, child.shallow);
                    live.fields.insert(key.clone(), replacement);
                }
            }
            _ => {
                live.fields.insert(key.clone(), Field::Value(value.clone()));
            }
        }
    }
}

fn read_only_view(value: &Value, shallow: bool) -> Field {
    match value {
        Value::Map(_) if shallow => Field::Node(Observable::shallow_readonly(value)),
        Value::Map(_) => Field::Node(Observable::readonly(value)),
        _ => Field::Value(value.clone()),
    }
}
