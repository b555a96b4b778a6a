//! Store-level document tree and partial-update patches.
//!
//! A document is a map of named fields. Writers address nested fields with a
//! segmented [`FieldPath`], so a segment may itself contain `.` without being
//! split.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub type Fields = BTreeMap<String, Value>;

/// A stored document: the top-level field map.
pub type Document = Fields;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Text(String),
    Map(Fields),
}

impl Value {
    pub fn empty_map() -> Self {
        Value::Map(Fields::new())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Fields> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Fields> for Value {
    fn from(m: Fields) -> Self {
        Value::Map(m)
    }
}

/// Path to a nested field, one entry per map level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Split a dotted path. Only for paths whose segments contain no dots.
    pub fn parse_dotted(path: &str) -> Self {
        Self::new(path.split('.'))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchOp {
    Set(Value),
    /// Remove the field and everything below it.
    Delete,
}

/// One targeted field write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub path: FieldPath,
    pub op: PatchOp,
}

impl Patch {
    pub fn set(path: FieldPath, value: impl Into<Value>) -> Self {
        Self {
            path,
            op: PatchOp::Set(value.into()),
        }
    }

    pub fn delete(path: FieldPath) -> Self {
        Self {
            path,
            op: PatchOp::Delete,
        }
    }
}

/// Deep-merge `incoming` into `target`. Maps merge key by key; any other
/// value replaces what was there. An empty incoming map leaves an existing
/// map untouched.
pub fn merge_into(target: &mut Fields, incoming: Fields) {
    for (key, value) in incoming {
        match (target.get_mut(&key), value) {
            (Some(Value::Map(existing)), Value::Map(nested)) => merge_into(existing, nested),
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// Apply one patch. Missing intermediate maps are created for `Set`; a
/// non-map value in the way is replaced by a map. `Delete` of a missing
/// field is a no-op. Empty paths are ignored (rejected earlier by the store).
pub fn apply_patch(doc: &mut Document, patch: &Patch) {
    let Some((leaf, parents)) = patch.path.segments().split_last() else {
        return;
    };

    match &patch.op {
        PatchOp::Set(value) => {
            let mut current = doc;
            for segment in parents {
                let slot = current
                    .entry(segment.clone())
                    .or_insert_with(Value::empty_map);
                if !matches!(slot, Value::Map(_)) {
                    *slot = Value::empty_map();
                }
                let Value::Map(next) = slot else {
                    return;
                };
                current = next;
            }
            current.insert(leaf.clone(), value.clone());
        }
        PatchOp::Delete => {
            let mut current = doc;
            for segment in parents {
                current = match current.get_mut(segment) {
                    Some(Value::Map(m)) => m,
                    _ => return,
                };
            }
            current.remove(leaf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map<const N: usize>(entries: [(&str, Value); N]) -> Value {
        Value::Map(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    fn doc<const N: usize>(entries: [(&str, Value); N]) -> Document {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn merge_keeps_sibling_keys() {
        let mut target = doc([(
            "participants",
            map([("alice", map([("r0_c0", true.into())]))]),
        )]);
        let incoming = doc([("participants", map([("bob", Value::empty_map())]))]);
        merge_into(&mut target, incoming);

        let participants = target["participants"].as_map().unwrap();
        assert_eq!(participants.len(), 2);
        assert_eq!(
            participants["alice"].as_map().unwrap()["r0_c0"],
            Value::Bool(true)
        );
    }

    #[test]
    fn merge_empty_map_does_not_reset_existing() {
        let mut target = doc([(
            "participants",
            map([("alice", map([("r1_c2", false.into())]))]),
        )]);
        let incoming = doc([("participants", map([("alice", Value::empty_map())]))]);
        merge_into(&mut target, incoming);
        let alice = target["participants"].as_map().unwrap()["alice"]
            .as_map()
            .unwrap();
        assert_eq!(alice.get("r1_c2"), Some(&Value::Bool(false)));
    }

    #[test]
    fn merge_scalar_replaces() {
        let mut target = doc([("title", "old".into())]);
        merge_into(&mut target, doc([("title", "new".into())]));
        assert_eq!(target["title"], Value::Text("new".into()));
    }

    #[test]
    fn set_creates_intermediate_maps() {
        let mut d = Document::new();
        apply_patch(
            &mut d,
            &Patch::set(FieldPath::new(["participants", "bob", "r0_c0"]), true),
        );
        let bob = d["participants"].as_map().unwrap()["bob"].as_map().unwrap();
        assert_eq!(bob["r0_c0"], Value::Bool(true));
    }

    #[test]
    fn set_through_scalar_replaces_it_with_a_map() {
        let mut d = doc([("participants", Value::from("broken"))]);
        apply_patch(
            &mut d,
            &Patch::set(FieldPath::new(["participants", "bob", "r0_c0"]), true),
        );
        let bob = d["participants"].as_map().unwrap()["bob"].as_map().unwrap();
        assert_eq!(bob["r0_c0"], Value::Bool(true));
    }

    #[test]
    fn set_touches_only_the_leaf() {
        let mut d = doc([(
            "participants",
            map([
                ("alice", map([("r0_c0", true.into())])),
                ("bob", map([("r0_c0", false.into())])),
            ]),
        )]);
        apply_patch(
            &mut d,
            &Patch::set(FieldPath::new(["participants", "bob", "r0_c1"]), true),
        );
        let participants = d["participants"].as_map().unwrap();
        assert_eq!(participants["alice"], map([("r0_c0", true.into())]));
        assert_eq!(
            participants["bob"],
            map([("r0_c0", false.into()), ("r0_c1", true.into())])
        );
    }

    #[test]
    fn delete_removes_subtree_only() {
        let mut d = doc([(
            "participants",
            map([
                ("alice", map([("r0_c0", true.into())])),
                ("bob", map([("r0_c0", true.into())])),
            ]),
        )]);
        apply_patch(&mut d, &Patch::delete(FieldPath::new(["participants", "alice"])));
        let participants = d["participants"].as_map().unwrap();
        assert!(!participants.contains_key("alice"));
        assert!(participants.contains_key("bob"));
    }

    #[test]
    fn delete_missing_is_noop() {
        let mut d = doc([("meta", Value::empty_map())]);
        let before = d.clone();
        apply_patch(&mut d, &Patch::delete(FieldPath::new(["participants", "ghost"])));
        assert_eq!(d, before);
    }

    #[test]
    fn segments_may_contain_dots() {
        let mut d = Document::new();
        apply_patch(
            &mut d,
            &Patch::set(FieldPath::new(["participants", "j.smith", "r0_c0"]), true),
        );
        let participants = d["participants"].as_map().unwrap();
        assert!(participants.contains_key("j.smith"));
        assert_eq!(
            FieldPath::new(["participants", "j.smith"]).to_string(),
            "participants.j.smith"
        );
    }

    #[test]
    fn parse_dotted_splits_segments() {
        let p = FieldPath::parse_dotted("participants.bob.r3_c1");
        assert_eq!(p.segments(), ["participants", "bob", "r3_c1"]);
        assert_eq!(p.len(), 3);
    }
}
