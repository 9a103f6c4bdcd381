//! Method Identifier
//!
//! Fully-qualified Java method identity: class, name, and JVM descriptor,
//! e.g. `com.example.Foo.bar(ILjava/lang/String;)V`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fully-qualified method identifier (class + name + descriptor).
///
/// Two identifiers denote "the same method" when they agree structurally,
/// regardless of which project version produced them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodIdentifier(String);

impl MethodIdentifier {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The descriptor part, starting at the opening parenthesis.
    pub fn descriptor(&self) -> &str {
        match self.0.find('(') {
            Some(pos) => &self.0[pos..],
            None => "",
        }
    }

    /// Class + method without descriptor, e.g. `com.example.Foo.bar`.
    /// This is the unique access string used for syntax-change lookup.
    pub fn access_string(&self) -> &str {
        match self.0.find('(') {
            Some(pos) => &self.0[..pos],
            None => &self.0,
        }
    }

    /// The declaring class, e.g. `com.example.Foo`.
    pub fn class_name(&self) -> &str {
        let access = self.access_string();
        match access.rfind('.') {
            Some(pos) => &access[..pos],
            None => access,
        }
    }

    /// The bare method name, e.g. `bar`.
    pub fn method_name(&self) -> &str {
        let access = self.access_string();
        match access.rfind('.') {
            Some(pos) => &access[pos + 1..],
            None => access,
        }
    }
}

impl fmt::Display for MethodIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MethodIdentifier {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for MethodIdentifier {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}
