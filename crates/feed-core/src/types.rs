//! Identifier and status primitives.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The immutable identity of one ingestable item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    namespace: String,
    objid: String,
}

impl Identifier {
    pub fn new(namespace: impl Into<String>, objid: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            objid: objid.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn objid(&self) -> &str {
        &self.objid
    }

    /// The full identifier, `namespace.objid`.
    pub fn full(&self) -> String {
        format!("{}.{}", self.namespace, self.objid)
    }

    /// The pairtree-encoded form of the object identifier. Stable: derived
    /// deterministically from `objid`.
    pub fn pt_objid(&self) -> String {
        feed_pairtree::s2ppchars(&self.objid)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.objid)
    }
}

/// A volume's position in its package type's stage map. Statuses are open
/// strings because each package type declares its own map; the well-known
/// ones get constructors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(String);

impl Status {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The status every freshly queued volume starts in.
    pub fn ready() -> Self {
        Self::new("ready")
    }

    /// Terminal success: the AIP is in the object store.
    pub fn collated() -> Self {
        Self::new("collated")
    }

    /// Terminal failure.
    pub fn punted() -> Self {
        Self::new("punted")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Status {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
