// Wire shape of state deltas.
//
// A delta is one replayable instruction `{path, op, value}`. The server's
// property graph emits them in mutation order; each client applies them in
// the same order to its mirror. Paths are sequences of map keys and list
// indices from the graph root, encoded as JSON strings and numbers.
//
// See `arena_core::delta` for the graph that produces these and for the
// replay semantics of each operation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::WireValue;

/// One step of a path from the graph root.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathKey {
    Index(usize),
    Key(String),
}

impl From<&str> for PathKey {
    fn from(s: &str) -> Self {
        PathKey::Key(s.to_owned())
    }
}

impl From<String> for PathKey {
    fn from(s: String) -> Self {
        PathKey::Key(s)
    }
}

impl From<usize> for PathKey {
    fn from(i: usize) -> Self {
        PathKey::Index(i)
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathKey::Index(i) => write!(f, "{i}"),
            PathKey::Key(k) => f.write_str(k),
        }
    }
}

/// The operation a delta performs at its path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeltaOp {
    /// Replace the value at `path`.
    Set,
    /// Insert a new key (the last path element) into the parent map.
    PutKey,
    /// Remove a key (the last path element) from the parent map.
    RemoveKey,
    /// Replace `remove` elements at `index` of the list at `path` with the
    /// elements of `value`.
    Splice { index: usize, remove: usize },
}

/// A delta as sent to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireDelta {
    pub path: Vec<PathKey>,
    pub op: DeltaOp,
    pub value: WireValue,
}

/// Render a path as `a/b/3` for log lines and error messages.
pub fn display_path(path: &[PathKey]) -> String {
    let parts: Vec<String> = path.iter().map(ToString::to_string).collect();
    format!("/{}", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_keys_encode_as_plain_json() {
        let path = vec![PathKey::from("gameObjects"), PathKey::from("7"), 2.into()];
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, r#"["gameObjects","7",2]"#);
        let back: Vec<PathKey> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn splice_op_carries_its_bounds() {
        let delta = WireDelta {
            path: vec!["game".into(), "log".into()],
            op: DeltaOp::Splice {
                index: 3,
                remove: 1,
            },
            value: serde_json::json!(["x"]),
        };
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["op"]["splice"]["index"], 3);
        assert_eq!(json["op"]["splice"]["remove"], 1);
    }

    #[test]
    fn display_path_joins_segments() {
        let path = vec![PathKey::from("session"), PathKey::from("players"), 1.into()];
        assert_eq!(display_path(&path), "/session/players/1");
        assert_eq!(display_path(&[]), "/");
    }
}
