//! Merge guard for nested sub-documents during hydration.
//!
//! A fetched snapshot can be older than, or ordered differently from, a list
//! the user is building inside a node's `config` (for example a package
//! selection). Replacing such a list wholesale makes it visibly shrink or
//! reshuffle. [`HydrationGuard`] compares the incoming and local lists as
//! *sets of canonical elements* and keeps the local list whenever the server
//! copy is not strictly ahead of it.
//!
//! The guard only looks at allow-listed field names; every other part of the
//! snapshot hydrates from the server unconditionally.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde::Serialize;
use serde_json::Value;

use crate::graph::{GraphModel, GraphSnapshot};
use crate::types::NodeId;

// ---------------------------------------------------------------------------
// Canonicalization
// ---------------------------------------------------------------------------

/// JSON text of `value` with object keys sorted at every depth.
///
/// Two records with the same fields in a different property order produce
/// the same string. Array order is preserved inside an element.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Keys are re-escaped through serde_json so quotes stay valid.
                let _ = write!(out, "{}:", Value::String(key.clone()));
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

/// Canonical signature set of a list; element order is irrelevant.
pub fn canonical_set(items: &[Value]) -> BTreeSet<String> {
    items.iter().map(canonical_json).collect()
}

// ---------------------------------------------------------------------------
// Field comparison
// ---------------------------------------------------------------------------

/// How a guarded sub-document field compares between local and incoming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldDecision {
    /// Same canonical set. Local value kept untouched.
    Equivalent,
    /// Local is a strict superset of incoming. Local value kept.
    LocalAhead,
    /// Incoming is a strict superset of local. Incoming value taken.
    ServerAhead,
    /// Partial overlap or a type mismatch. Local value kept, logged.
    Ambiguous,
}

impl FieldDecision {
    pub fn keeps_local(self) -> bool {
        !matches!(self, FieldDecision::ServerAhead)
    }

    /// Whether the kept local value differs in content from the server's.
    pub fn diverges(self) -> bool {
        matches!(self, FieldDecision::LocalAhead | FieldDecision::Ambiguous)
    }
}

/// Compare one guarded field. Missing and `null` values count as empty lists.
pub fn compare_sub_documents(local: Option<&Value>, incoming: Option<&Value>) -> FieldDecision {
    let (Some(local), Some(incoming)) = (as_list(local), as_list(incoming)) else {
        return FieldDecision::Ambiguous;
    };

    let local = canonical_set(local);
    let incoming = canonical_set(incoming);

    if local == incoming {
        FieldDecision::Equivalent
    } else if local.is_superset(&incoming) {
        FieldDecision::LocalAhead
    } else if incoming.is_superset(&local) {
        FieldDecision::ServerAhead
    } else {
        FieldDecision::Ambiguous
    }
}

fn as_list(value: Option<&Value>) -> Option<&[Value]> {
    match value {
        None | Some(Value::Null) => Some(&[]),
        Some(Value::Array(items)) => Some(items.as_slice()),
        Some(_) => None,
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// A guarded field whose local value survived hydration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetainedField {
    pub node_id: NodeId,
    pub field: String,
    pub decision: FieldDecision,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HydrationReport {
    pub retained: Vec<RetainedField>,
}

impl HydrationReport {
    /// True when at least one kept local value differs from the server copy,
    /// i.e. the local model is still ahead after hydrating.
    pub fn local_ahead(&self) -> bool {
        self.retained.iter().any(|field| field.decision.diverges())
    }
}

#[derive(Debug, Clone, Default)]
pub struct HydrationGuard {
    guarded_fields: Vec<String>,
}

impl HydrationGuard {
    pub fn new<I, S>(guarded_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            guarded_fields: guarded_fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn guarded_fields(&self) -> &[String] {
        &self.guarded_fields
    }

    pub fn is_guarded(&self, field: &str) -> bool {
        self.guarded_fields.iter().any(|guarded| guarded == field)
    }

    /// Merge an incoming snapshot with the local model, field by field.
    ///
    /// Nodes that do not exist locally hydrate as-is. For nodes present on
    /// both sides, each guarded field keeps the local value unless the server
    /// copy is strictly ahead.
    pub fn merge(&self, local: &GraphModel, mut incoming: GraphSnapshot) -> (GraphSnapshot, HydrationReport) {
        let mut report = HydrationReport::default();
        if self.guarded_fields.is_empty() {
            return (incoming, report);
        }

        for node in &mut incoming.nodes {
            let Some(local_node) = local.node(&node.id) else {
                continue;
            };

            for field in &self.guarded_fields {
                let local_value = local_node.config.get(field);
                let decision = compare_sub_documents(local_value, node.config.get(field));
                if !decision.keeps_local() {
                    continue;
                }

                if decision == FieldDecision::Ambiguous {
                    tracing::warn!(
                        graph = %incoming.name,
                        node = %node.id,
                        field = %field,
                        "Ambiguous sub-document on hydration, keeping local value",
                    );
                }

                let differs = local_value != node.config.get(field);
                match local_value {
                    Some(value) => {
                        node.config.insert(field.clone(), value.clone());
                    }
                    None => {
                        node.config.remove(field);
                    }
                }

                if decision != FieldDecision::Equivalent || differs {
                    report.retained.push(RetainedField {
                        node_id: node.id.clone(),
                        field: field.clone(),
                        decision,
                    });
                }
            }
        }

        (incoming, report)
    }

    /// Hydrate `model` from `incoming`, applying the guard.
    pub fn hydrate(&self, model: &mut GraphModel, incoming: GraphSnapshot) -> HydrationReport {
        let (merged, report) = self.merge(model, incoming);
        model.replace(merged);
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
