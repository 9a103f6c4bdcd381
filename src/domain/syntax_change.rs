//! Syntax Change Data
//!
//! Per-version syntactic change records produced by an external differ,
//! keyed by unique access string (class or class.method).

use crate::domain::identifier::MethodIdentifier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of syntactic change between two consecutive versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Addition,
    Modification,
    Rename,
    Move,
    Removal,
    NewClass,
    RemovedClass,
}

/// One syntactic change record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntaxChange {
    /// Unique access string: `com.example.Foo` or `com.example.Foo.bar`.
    pub unique_access: String,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_code: Option<String>,
    /// Affected method name, when the change is method-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_name: Option<String>,
}

/// All syntax changes applicable to one version: access string -> change list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    pub by_access: HashMap<String, Vec<SyntaxChange>>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_changes(changes: Vec<SyntaxChange>) -> Self {
        let mut by_access: HashMap<String, Vec<SyntaxChange>> = HashMap::new();
        for change in changes {
            by_access
                .entry(change.unique_access.clone())
                .or_default()
                .push(change);
        }
        Self { by_access }
    }

    /// Changes recorded for an access string. May be empty.
    pub fn changes_for(&self, access: &str) -> &[SyntaxChange] {
        self.by_access.get(access).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Changes applicable to a method: those keyed by the method's own
    /// access string plus class-level changes on its declaring class.
    pub fn changes_for_method(&self, identifier: &MethodIdentifier) -> Vec<SyntaxChange> {
        let mut out: Vec<SyntaxChange> = self.changes_for(identifier.access_string()).to_vec();
        for change in self.changes_for(identifier.class_name()) {
            match &change.method_name {
                // Class-level record scoped to one method: only applicable
                // when it names this method.
                Some(name) if name != identifier.method_name() => {}
                _ => out.push(change.clone()),
            }
        }
        out
    }

    /// Whether the method was syntactically modified in this version.
    pub fn is_modified(&self, identifier: &MethodIdentifier) -> bool {
        !self.changes_for_method(identifier).is_empty()
    }

    /// Access strings of all change sites, sorted for deterministic output.
    pub fn change_sites(&self) -> Vec<&str> {
        let mut sites: Vec<&str> = self.by_access.keys().map(|s| s.as_str()).collect();
        sites.sort_unstable();
        sites
    }

    pub fn is_empty(&self) -> bool {
        self.by_access.is_empty()
    }
}
