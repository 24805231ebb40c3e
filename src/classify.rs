//! Field classification against the active policy snapshot
//!
//! Rules are evaluated in snapshot order (priority descending, declaration
//! order for ties); the first match wins and no match means `NONE`. All
//! patterns were compiled at policy load, so classification is total and
//! never fails on any input.

use crate::policy::PolicySnapshot;
use crate::types::{join_path, Record, SensitivityClass};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of classifying a record: dotted field path to sensitivity class
///
/// Only sensitive fields are stored; an absent path means `NONE`.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    classes: HashMap<String, SensitivityClass>,
}

impl Classification {
    /// The class assigned to a field path
    pub fn class_for(&self, path: &str) -> SensitivityClass {
        self.classes.get(path).copied().unwrap_or_default()
    }

    /// Iterate over sensitive field paths and their classes
    pub fn iter(&self) -> impl Iterator<Item = (&String, SensitivityClass)> {
        self.classes.iter().map(|(path, class)| (path, *class))
    }

    /// Number of sensitive fields
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether no field was classified as sensitive
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    fn set(&mut self, path: String, class: SensitivityClass) {
        self.classes.insert(path, class);
    }
}

/// Classifies record fields against one policy snapshot
///
/// Holds an `Arc` to the snapshot it was created from, so a concurrent
/// policy reload never changes rules mid-classification.
pub struct Classifier {
    snapshot: Arc<PolicySnapshot>,
}

impl Classifier {
    /// Create a classifier over a policy snapshot
    pub fn new(snapshot: Arc<PolicySnapshot>) -> Self {
        Self { snapshot }
    }

    /// Classify every field of a record
    ///
    /// Nested records are walked recursively with dotted paths. An
    /// object-valued field that matches a name-only rule with a sensitive
    /// class is tagged whole (the codec seals the entire subtree);
    /// otherwise the walk descends into it.
    pub fn classify(&self, record: &Record) -> Classification {
        let mut classification = Classification::default();
        self.walk(record, "", &mut classification);
        classification
    }

    fn walk(&self, record: &Record, prefix: &str, out: &mut Classification) {
        for (name, value) in record {
            let path = join_path(prefix, name);
            match value {
                Value::Object(nested) => {
                    let class = self.match_rules(&path, None);
                    if class.is_sensitive() {
                        out.set(path, class);
                    } else {
                        self.walk(nested, &path, out);
                    }
                }
                scalar => {
                    let form = scalar_form(scalar);
                    let class = self.match_rules(&path, form.as_deref());
                    if class.is_sensitive() {
                        out.set(path, class);
                    }
                }
            }
        }
    }

    /// First matching rule wins; an explicit `NONE` rule shields the field
    /// from lower-priority rules.
    fn match_rules(&self, path: &str, value: Option<&str>) -> SensitivityClass {
        for rule in &self.snapshot.classifiers {
            if let Some(re) = &rule.field_re {
                if !re.is_match(path) {
                    continue;
                }
            }
            match (&rule.value_re, value) {
                (Some(re), Some(v)) => {
                    if !re.is_match(v) {
                        continue;
                    }
                }
                // Value rules never match fields without a scalar string form
                (Some(_), None) => continue,
                (None, _) => {}
            }
            return rule.class;
        }
        SensitivityClass::None
    }
}

/// String form of a scalar for value-pattern matching
///
/// Numbers match via their display form; bools, nulls, and arrays are
/// matchable by name patterns only.
fn scalar_form(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
