/// [crate::nodekey] contains [NodeKey], the identifier a client sends for a node, and the
/// create/update classification applied independently at the section, question and option
/// levels of a sync.
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
};

use crate::properties::NodeId;

/// Prefix clients use for placeholder ids (`temp-1700000000`, `temp-q-...`, `temp-opt-...`).
/// Stored ids are hyphenated UUIDs, so nothing the store assigns can start with it.
pub const EPHEMERAL_PREFIX: &str = "temp-";

/// How a client refers to a node in a sync payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum NodeKey {
    /// Client-minted placeholder token. Never written to storage.
    Ephemeral(String),
    /// An id the store handed out earlier.
    Persisted(NodeId),
}

impl NodeKey {
    /// Empty, `temp-` prefixed and otherwise unparseable ids all become [NodeKey::Ephemeral]: none
    /// of them can name a stored row.
    pub fn parse(raw: &str) -> NodeKey {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with(EPHEMERAL_PREFIX) {
            return NodeKey::Ephemeral(trimmed.to_string());
        }
        match NodeId::try_from(trimmed) {
            Ok(id) => NodeKey::Persisted(id),
            Err(_) => {
                tracing::debug!("[NodeKey::parse] '{trimmed}' is not a stored id, treating as new");
                NodeKey::Ephemeral(trimmed.to_string())
            }
        }
    }

    pub fn persisted(&self) -> Option<NodeId> {
        match self {
            NodeKey::Persisted(id) => Some(*id),
            NodeKey::Ephemeral(_) => None,
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, NodeKey::Ephemeral(_))
    }
}

impl Default for NodeKey {
    fn default() -> Self {
        NodeKey::Ephemeral(String::new())
    }
}

impl From<Option<String>> for NodeKey {
    fn from(raw: Option<String>) -> Self {
        raw.map(|s| NodeKey::parse(&s)).unwrap_or_default()
    }
}

impl From<&str> for NodeKey {
    fn from(raw: &str) -> Self {
        NodeKey::parse(raw)
    }
}

impl From<NodeId> for NodeKey {
    fn from(id: NodeId) -> Self {
        NodeKey::Persisted(id)
    }
}

impl From<NodeKey> for String {
    fn from(key: NodeKey) -> Self {
        key.to_string()
    }
}

impl Display for NodeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKey::Ephemeral(token) => write!(f, "{token}"),
            NodeKey::Persisted(id) => write!(f, "{id}"),
        }
    }
}

/// What the planner decides for one incoming node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    Create,
    Update(NodeId),
}

impl Disposition {
    pub fn is_create(&self) -> bool {
        matches!(self, Disposition::Create)
    }
}

/// Classify an incoming node against the ids that already exist under the same parent.
///
/// Only a persisted key found in `known` is an update. Ephemeral keys, and persisted keys that
/// belong to some other parent or to nothing at all, are creates.
pub fn classify(key: &NodeKey, known: &BTreeSet<NodeId>) -> Disposition {
    match key {
        NodeKey::Persisted(id) if known.contains(id) => Disposition::Update(*id),
        _ => Disposition::Create,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_parse_ephemeral_forms() {
        assert_eq!(NodeKey::parse(""), NodeKey::Ephemeral(String::new()));
        assert_eq!(
            NodeKey::parse("temp-q-1700000000"),
            NodeKey::Ephemeral("temp-q-1700000000".into())
        );
        assert!(NodeKey::parse("clx9a0b1c0000").is_ephemeral());
    }

    #[test]
    fn test_parse_persisted() {
        let id = NodeId::new();
        assert_eq!(NodeKey::parse(&id.to_string()), NodeKey::Persisted(id));
        assert_eq!(NodeKey::parse(&format!(" {id} ")).persisted(), Some(id));
    }

    #[test]
    fn test_serde_accepts_missing_and_null() {
        #[derive(Deserialize)]
        struct Holder {
            #[serde(default)]
            id: NodeKey,
        }
        let missing: Holder = serde_json::from_str("{}").unwrap();
        assert_eq!(missing.id, NodeKey::default());
        let null: Holder = serde_json::from_str(r#"{"id": null}"#).unwrap();
        assert!(null.id.is_ephemeral());

        let id = NodeId::new();
        let json = serde_json::to_string(&NodeKey::Persisted(id)).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn test_classify() {
        let existing = NodeId::new();
        let elsewhere = NodeId::new();
        let known = BTreeSet::from([existing]);

        assert_eq!(
            classify(&NodeKey::Persisted(existing), &known),
            Disposition::Update(existing)
        );
        assert_eq!(
            classify(&NodeKey::Persisted(elsewhere), &known),
            Disposition::Create
        );
        assert_eq!(
            classify(&NodeKey::parse("temp-1"), &known),
            Disposition::Create
        );
        assert_eq!(classify(&NodeKey::default(), &known), Disposition::Create);
        assert!(classify(&NodeKey::default(), &BTreeSet::new()).is_create());
    }
}
