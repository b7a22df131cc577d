// Change-tracking property graph.
//
// `DeltaGraph` holds a session's entire observable state as a tree of nodes
// (scalars, ordered lists, string-keyed maps) and records every mutation as a
// `Delta` in a pending buffer, in call order. Replaying the buffer on a mirror
// that started from the same base state reproduces the current state exactly;
// that is the whole synchronization contract with clients.
//
// Rules the graph enforces:
// - A path's kind (scalar / list / map) is fixed once created. Trying to
//   change it is a `StructuralInvariantError`, never handled silently.
// - Writing a scalar equal to the stored one records nothing.
// - Assigning a whole map or list onto an existing one is diffed by key /
//   index against what is there: removed keys, new keys, changed leaves and
//   one trailing splice for length changes. Bandwidth scales with the size of
//   the change, not of the container.
// - Removing an absent key is a no-op.
//
// Undo journal: alongside each pending delta the graph records its inverse.
// `checkpoint` / `rollback` use it to undo a faulted dispatch, leaving both
// the state and the pending buffer exactly as they were. `commit` clears the
// journal; `flush` commits and hands the buffer out. Nothing committed can be
// rolled back.
//
// Object references inside the graph are `Value::Object` ids (see
// `value.rs`), compared by identity, so the ownership structure stays a tree.

use std::collections::BTreeMap;

use arena_protocol::delta::{DeltaOp, PathKey, WireDelta, display_path};
use arena_protocol::types::WireValue;

use crate::error::StructuralInvariantError;
use crate::serializer;
use crate::value::{Kind, Value};

/// Build a graph path from keys and indices: `path!["session", "players", 0usize]`.
#[macro_export]
macro_rules! path {
    ($($key:expr),* $(,)?) => {
        vec![$($crate::PathKey::from($key)),*]
    };
}

/// One replayable state change.
#[derive(Clone, Debug, PartialEq)]
pub struct Delta {
    pub path: Vec<PathKey>,
    pub op: DeltaOp,
    pub value: Value,
}

impl Delta {
    /// Wire form, with object references flattened to ids.
    pub fn to_wire(&self) -> WireDelta {
        WireDelta {
            path: self.path.clone(),
            op: self.op,
            value: serializer::flatten(&self.value),
        }
    }

    /// Untyped view of a wire delta, for client-side mirrors.
    pub fn from_wire(wire: &WireDelta) -> Self {
        Self {
            path: wire.path.clone(),
            op: wire.op,
            value: serializer::untyped(&wire.value),
        }
    }
}

/// A tracked node.
#[derive(Clone, Debug, PartialEq)]
enum Node {
    Scalar(Value),
    List(Vec<Node>),
    Map(BTreeMap<String, Node>),
}

impl Node {
    fn from_value(value: Value) -> Self {
        match value {
            Value::List(items) => Node::List(items.into_iter().map(Node::from_value).collect()),
            Value::Map(entries) => Node::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Node::from_value(v)))
                    .collect(),
            ),
            scalar => Node::Scalar(scalar),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Node::Scalar(v) => v.clone(),
            Node::List(items) => Value::List(items.iter().map(Node::to_value).collect()),
            Node::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
        }
    }

    fn kind(&self) -> Kind {
        match self {
            Node::Scalar(_) => Kind::Scalar,
            Node::List(_) => Kind::List,
            Node::Map(_) => Kind::Map,
        }
    }

    fn child(&self, key: &PathKey) -> Option<&Node> {
        match (self, key) {
            (Node::Map(entries), PathKey::Key(k)) => entries.get(k),
            (Node::List(items), PathKey::Index(i)) => items.get(*i),
            _ => None,
        }
    }

    fn child_mut(&mut self, key: &PathKey) -> Option<&mut Node> {
        match (self, key) {
            (Node::Map(entries), PathKey::Key(k)) => entries.get_mut(k),
            (Node::List(items), PathKey::Index(i)) => items.get_mut(*i),
            _ => None,
        }
    }
}

/// Position in the undo journal to roll back to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    /// Journal generation; bumped by every `flush` and `commit`.
    epoch: u64,
    journal: usize,
}

/// Collects emitted deltas and their inverses.
struct Recorder<'a> {
    pending: &'a mut Vec<Delta>,
    journal: &'a mut Vec<Delta>,
}

impl Recorder<'_> {
    fn emit(&mut self, delta: Delta, inverse: Delta) {
        self.pending.push(delta);
        self.journal.push(inverse);
    }
}

/// The change-tracking state tree of one session.
#[derive(Clone, Debug)]
pub struct DeltaGraph {
    root: Node,
    pending: Vec<Delta>,
    /// Inverses of the pending deltas recorded since the last commit.
    journal: Vec<Delta>,
    epoch: u64,
}

impl Default for DeltaGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaGraph {
    /// An empty graph whose root is a map.
    pub fn new() -> Self {
        Self {
            root: Node::Map(BTreeMap::new()),
            pending: Vec::new(),
            journal: Vec::new(),
            epoch: 0,
        }
    }

    /// A graph starting from `state` (which must be a map), with nothing
    /// pending. Used for mirrors built from a snapshot.
    pub fn from_value(state: Value) -> Result<Self, StructuralInvariantError> {
        if state.kind() != Kind::Map {
            return Err(StructuralInvariantError::KindChanged {
                path: "/".into(),
                from: Kind::Map,
                to: state.kind(),
            });
        }
        Ok(Self {
            root: Node::from_value(state),
            pending: Vec::new(),
            journal: Vec::new(),
            epoch: 0,
        })
    }

    /// Read the value at `path`.
    pub fn get(&self, path: &[PathKey]) -> Option<Value> {
        self.node(path).map(Node::to_value)
    }

    /// Kind of the node at `path`.
    pub fn kind_at(&self, path: &[PathKey]) -> Option<Kind> {
        self.node(path).map(Node::kind)
    }

    /// Length of the list at `path`.
    pub fn list_len(&self, path: &[PathKey]) -> Option<usize> {
        match self.node(path)? {
            Node::List(items) => Some(items.len()),
            _ => None,
        }
    }

    /// Whole state as a typed value.
    pub fn to_value(&self) -> Value {
        self.root.to_value()
    }

    /// Whole state in wire form, the base for replaying later deltas.
    pub fn snapshot(&self) -> WireValue {
        serializer::flatten(&self.to_value())
    }

    /// Deltas recorded since the last flush.
    pub fn pending(&self) -> &[Delta] {
        &self.pending
    }

    fn node(&self, path: &[PathKey]) -> Option<&Node> {
        path.iter().try_fold(&self.root, |node, key| node.child(key))
    }

    /// Write `value` at `path`.
    ///
    /// The parent container must exist. A missing map key is created (one
    /// `put-key`); an existing node is updated in place, diffed by key / index
    /// for containers.
    pub fn set(&mut self, path: &[PathKey], value: Value) -> Result<(), StructuralInvariantError> {
        let DeltaGraph {
            root,
            pending,
            journal,
            ..
        } = self;
        let mut rec = Recorder { pending, journal };

        let Some((last, parent_path)) = path.split_last() else {
            return assign(&mut rec, &mut Vec::new(), root, value);
        };
        let parent = node_mut(root, parent_path)?;
        if let Some(existing) = parent.child_mut(last) {
            let mut at = path.to_vec();
            return assign(&mut rec, &mut at, existing, value);
        }
        match (parent, last) {
            (Node::Map(entries), PathKey::Key(k)) => {
                rec.emit(
                    Delta {
                        path: path.to_vec(),
                        op: DeltaOp::PutKey,
                        value: value.clone(),
                    },
                    Delta {
                        path: path.to_vec(),
                        op: DeltaOp::RemoveKey,
                        value: Value::Null,
                    },
                );
                entries.insert(k.clone(), Node::from_value(value));
                Ok(())
            }
            (Node::List(items), PathKey::Index(index)) => {
                Err(StructuralInvariantError::IndexOutOfRange {
                    path: display_path(parent_path),
                    index: *index,
                    len: items.len(),
                })
            }
            _ => Err(StructuralInvariantError::MissingContainer {
                path: display_path(path),
            }),
        }
    }

    /// Insert or update `key` in the map at `map_path`.
    pub fn put_key(
        &mut self,
        map_path: &[PathKey],
        key: &str,
        value: Value,
    ) -> Result<(), StructuralInvariantError> {
        self.expect_kind(map_path, Kind::Map)?;
        let mut path = map_path.to_vec();
        path.push(PathKey::from(key));
        self.set(&path, value)
    }

    /// Remove `key` from the map at `map_path`. Removing an absent key does
    /// nothing.
    pub fn remove_key(
        &mut self,
        map_path: &[PathKey],
        key: &str,
    ) -> Result<(), StructuralInvariantError> {
        self.expect_kind(map_path, Kind::Map)?;
        let DeltaGraph {
            root,
            pending,
            journal,
            ..
        } = self;
        let Node::Map(entries) = node_mut(root, map_path)? else {
            return Err(StructuralInvariantError::MissingContainer {
                path: display_path(map_path),
            });
        };
        let Some(old) = entries.remove(key) else {
            return Ok(());
        };
        let mut path = map_path.to_vec();
        path.push(PathKey::from(key));
        Recorder { pending, journal }.emit(
            Delta {
                path: path.clone(),
                op: DeltaOp::RemoveKey,
                value: Value::Null,
            },
            Delta {
                path,
                op: DeltaOp::PutKey,
                value: old.to_value(),
            },
        );
        Ok(())
    }

    /// Remove `remove` elements at `index` of the list at `list_path` and
    /// insert `insert` in their place.
    pub fn splice(
        &mut self,
        list_path: &[PathKey],
        index: usize,
        remove: usize,
        insert: Vec<Value>,
    ) -> Result<(), StructuralInvariantError> {
        self.expect_kind(list_path, Kind::List)?;
        let DeltaGraph {
            root,
            pending,
            journal,
            ..
        } = self;
        let Node::List(items) = node_mut(root, list_path)? else {
            return Err(StructuralInvariantError::MissingContainer {
                path: display_path(list_path),
            });
        };
        let mut rec = Recorder { pending, journal };
        splice_list(&mut rec, list_path, items, index, remove, insert)
    }

    /// Append `value` to the list at `list_path`.
    pub fn push(&mut self, list_path: &[PathKey], value: Value) -> Result<(), StructuralInvariantError> {
        let len = self.list_len(list_path).ok_or_else(|| {
            StructuralInvariantError::MissingContainer {
                path: display_path(list_path),
            }
        })?;
        self.splice(list_path, len, 0, vec![value])
    }

    fn expect_kind(&self, path: &[PathKey], kind: Kind) -> Result<(), StructuralInvariantError> {
        match self.node(path) {
            None => Err(StructuralInvariantError::MissingContainer {
                path: display_path(path),
            }),
            Some(node) if node.kind() != kind => Err(StructuralInvariantError::KindChanged {
                path: display_path(path),
                from: node.kind(),
                to: kind,
            }),
            Some(_) => Ok(()),
        }
    }

    /// Hand out and clear the pending buffer. Also commits.
    pub fn flush(&mut self) -> Vec<Delta> {
        self.commit();
        std::mem::take(&mut self.pending)
    }

    /// Make everything recorded so far permanent: later rollbacks stop here.
    pub fn commit(&mut self) {
        self.journal.clear();
        self.epoch += 1;
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            epoch: self.epoch,
            journal: self.journal.len(),
        }
    }

    /// Undo every mutation recorded after `checkpoint`, dropping the matching
    /// pending deltas.
    ///
    /// A checkpoint older than the last `commit` only rolls back to that
    /// commit.
    pub fn rollback(&mut self, checkpoint: Checkpoint) -> Result<(), StructuralInvariantError> {
        let keep = if checkpoint.epoch == self.epoch {
            checkpoint.journal.min(self.journal.len())
        } else {
            0
        };
        let undo: Vec<Delta> = self.journal.drain(keep..).collect();
        for inverse in undo.iter().rev() {
            apply_to(&mut self.root, inverse)?;
        }
        let pending = self.pending.len().saturating_sub(undo.len());
        self.pending.truncate(pending);
        Ok(())
    }

    /// Replay a delta without recording it. This is how mirrors follow the
    /// authoritative graph.
    pub fn apply(&mut self, delta: &Delta) -> Result<(), StructuralInvariantError> {
        apply_to(&mut self.root, delta)
    }
}

fn node_mut<'a>(
    root: &'a mut Node,
    path: &[PathKey],
) -> Result<&'a mut Node, StructuralInvariantError> {
    let mut node = root;
    for (depth, key) in path.iter().enumerate() {
        node = node
            .child_mut(key)
            .ok_or_else(|| StructuralInvariantError::MissingContainer {
                path: display_path(&path[..=depth]),
            })?;
    }
    Ok(node)
}

/// Update an existing node in place, emitting the minimal deltas.
fn assign(
    rec: &mut Recorder<'_>,
    at: &mut Vec<PathKey>,
    node: &mut Node,
    value: Value,
) -> Result<(), StructuralInvariantError> {
    match (node, value) {
        (Node::Scalar(old), value) if value.kind() == Kind::Scalar => {
            if *old != value {
                rec.emit(
                    Delta {
                        path: at.clone(),
                        op: DeltaOp::Set,
                        value: value.clone(),
                    },
                    Delta {
                        path: at.clone(),
                        op: DeltaOp::Set,
                        value: std::mem::replace(old, Value::Null),
                    },
                );
                *old = value;
            }
            Ok(())
        }
        (Node::Map(entries), Value::Map(incoming)) => {
            let removed: Vec<String> = entries
                .keys()
                .filter(|k| !incoming.contains_key(*k))
                .cloned()
                .collect();
            for key in removed {
                if let Some(old) = entries.remove(&key) {
                    at.push(PathKey::Key(key));
                    rec.emit(
                        Delta {
                            path: at.clone(),
                            op: DeltaOp::RemoveKey,
                            value: Value::Null,
                        },
                        Delta {
                            path: at.clone(),
                            op: DeltaOp::PutKey,
                            value: old.to_value(),
                        },
                    );
                    at.pop();
                }
            }
            for (key, value) in incoming {
                at.push(PathKey::Key(key.clone()));
                let result = match entries.get_mut(&key) {
                    Some(child) => assign(rec, at, child, value),
                    None => {
                        rec.emit(
                            Delta {
                                path: at.clone(),
                                op: DeltaOp::PutKey,
                                value: value.clone(),
                            },
                            Delta {
                                path: at.clone(),
                                op: DeltaOp::RemoveKey,
                                value: Value::Null,
                            },
                        );
                        entries.insert(key, Node::from_value(value));
                        Ok(())
                    }
                };
                at.pop();
                result?;
            }
            Ok(())
        }
        (Node::List(items), Value::List(incoming)) => {
            let shared = items.len().min(incoming.len());
            let old_len = items.len();
            let mut incoming = incoming.into_iter();
            for (index, value) in incoming.by_ref().take(shared).enumerate() {
                at.push(PathKey::Index(index));
                let result = assign(rec, at, &mut items[index], value);
                at.pop();
                result?;
            }
            let tail: Vec<Value> = incoming.collect();
            if !tail.is_empty() {
                splice_list(rec, at, items, old_len, 0, tail)
            } else if shared < old_len {
                splice_list(rec, at, items, shared, old_len - shared, Vec::new())
            } else {
                Ok(())
            }
        }
        (node, value) => Err(StructuralInvariantError::KindChanged {
            path: display_path(at),
            from: node.kind(),
            to: value.kind(),
        }),
    }
}

fn splice_list(
    rec: &mut Recorder<'_>,
    list_path: &[PathKey],
    items: &mut Vec<Node>,
    index: usize,
    remove: usize,
    insert: Vec<Value>,
) -> Result<(), StructuralInvariantError> {
    let end = index.saturating_add(remove);
    if end > items.len() {
        return Err(StructuralInvariantError::IndexOutOfRange {
            path: display_path(list_path),
            index: end,
            len: items.len(),
        });
    }
    if remove == 0 && insert.is_empty() {
        return Ok(());
    }
    let inserted = insert.len();
    let removed: Vec<Value> = items
        .splice(index..end, insert.iter().cloned().map(Node::from_value))
        .map(|node| node.to_value())
        .collect();
    rec.emit(
        Delta {
            path: list_path.to_vec(),
            op: DeltaOp::Splice { index, remove },
            value: Value::List(insert),
        },
        Delta {
            path: list_path.to_vec(),
            op: DeltaOp::Splice {
                index,
                remove: inserted,
            },
            value: Value::List(removed),
        },
    );
    Ok(())
}

/// Replay one delta onto a tree.
fn apply_to(root: &mut Node, delta: &Delta) -> Result<(), StructuralInvariantError> {
    let path = &delta.path;
    match delta.op {
        DeltaOp::Set | DeltaOp::PutKey => {
            let Some((last, parent_path)) = path.split_last() else {
                if delta.value.kind() != Kind::Map {
                    return Err(StructuralInvariantError::KindChanged {
                        path: "/".into(),
                        from: Kind::Map,
                        to: delta.value.kind(),
                    });
                }
                *root = Node::from_value(delta.value.clone());
                return Ok(());
            };
            let parent = node_mut(root, parent_path)?;
            match (parent, last) {
                (Node::Map(entries), PathKey::Key(k)) => {
                    entries.insert(k.clone(), Node::from_value(delta.value.clone()));
                    Ok(())
                }
                (Node::List(items), PathKey::Index(i)) if *i < items.len() => {
                    items[*i] = Node::from_value(delta.value.clone());
                    Ok(())
                }
                (Node::List(items), PathKey::Index(i)) => {
                    Err(StructuralInvariantError::IndexOutOfRange {
                        path: display_path(path),
                        index: *i,
                        len: items.len(),
                    })
                }
                _ => Err(StructuralInvariantError::MissingContainer {
                    path: display_path(path),
                }),
            }
        }
        DeltaOp::RemoveKey => {
            let Some((PathKey::Key(key), parent_path)) = path.split_last() else {
                return Err(StructuralInvariantError::MissingContainer {
                    path: display_path(path),
                });
            };
            match node_mut(root, parent_path)? {
                Node::Map(entries) => {
                    entries.remove(key);
                    Ok(())
                }
                other => Err(StructuralInvariantError::KindChanged {
                    path: display_path(parent_path),
                    from: other.kind(),
                    to: Kind::Map,
                }),
            }
        }
        DeltaOp::Splice { index, remove } => {
            let Value::List(insert) = &delta.value else {
                return Err(StructuralInvariantError::KindChanged {
                    path: display_path(path),
                    from: Kind::List,
                    to: delta.value.kind(),
                });
            };
            let items = match node_mut(root, path)? {
                Node::List(items) => items,
                other => {
                    return Err(StructuralInvariantError::KindChanged {
                        path: display_path(path),
                        from: other.kind(),
                        to: Kind::List,
                    });
                }
            };
            let end = index.saturating_add(remove);
            if end > items.len() {
                return Err(StructuralInvariantError::IndexOutOfRange {
                    path: display_path(path),
                    index: end,
                    len: items.len(),
                });
            }
            items.splice(index..end, insert.iter().cloned().map(Node::from_value));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use arena_protocol::types::ObjectId;

    use super::*;

    /// Replay everything `graph` recorded onto a mirror of `base`.
    fn replay(base: &Value, deltas: &[Delta]) -> Value {
        let mut mirror = DeltaGraph::from_value(base.clone()).unwrap();
        for delta in deltas {
            mirror.apply(delta).unwrap();
        }
        mirror.to_value()
    }

    fn units() -> Value {
        Value::map([
            ("a", Value::Int(1)),
            ("b", Value::Int(2)),
            ("c", Value::Int(3)),
        ])
    }

    #[test]
    fn mutation_sequence_replays_onto_mirror() {
        let mut graph = DeltaGraph::new();
        let base = graph.to_value();

        graph.set(&path!["units"], units()).unwrap();
        graph.set(&path!["log"], Value::List(vec![])).unwrap();
        graph.push(&path!["log"], Value::from("spawned")).unwrap();
        graph.put_key(&path!["units"], "d", Value::Int(4)).unwrap();
        graph.remove_key(&path!["units"], "a").unwrap();
        graph
            .set(&path!["units", "b"], Value::map([("hp", 10)]))
            .unwrap_err();
        graph.set(&path!["units", "b"], Value::Int(20)).unwrap();
        graph
            .splice(&path!["log"], 0, 1, vec![Value::from("x"), Value::from("y")])
            .unwrap();
        graph
            .set(
                &path!["target"],
                Value::Object(ObjectId::from("G-3")),
            )
            .unwrap();

        let deltas = graph.flush();
        assert_eq!(replay(&base, &deltas), graph.to_value());
        assert!(graph.pending().is_empty());
    }

    #[test]
    fn equal_scalar_write_records_nothing() {
        let mut graph = DeltaGraph::new();
        graph.set(&path!["turn"], Value::Int(3)).unwrap();
        graph.flush();
        graph.set(&path!["turn"], Value::Int(3)).unwrap();
        assert!(graph.pending().is_empty());
        graph
            .set(&path!["owner"], Value::Object(ObjectId::from("1")))
            .unwrap();
        graph.flush();
        graph
            .set(&path!["owner"], Value::Object(ObjectId::from("1")))
            .unwrap();
        assert!(graph.pending().is_empty());
    }

    #[test]
    fn replacing_one_key_of_a_map_emits_one_delta() {
        let mut graph = DeltaGraph::new();
        graph.set(&path!["units"], units()).unwrap();
        graph.flush();

        let mut changed = units();
        if let Value::Map(entries) = &mut changed {
            entries.insert("b".into(), Value::Int(99));
        }
        graph.set(&path!["units"], changed).unwrap();

        assert_eq!(
            graph.pending(),
            &[Delta {
                path: path!["units", "b"],
                op: DeltaOp::Set,
                value: Value::Int(99),
            }]
        );
    }

    #[test]
    fn wholesale_map_replacement_is_granular() {
        let mut graph = DeltaGraph::new();
        graph.set(&path!["units"], units()).unwrap();
        graph.flush();

        graph
            .set(
                &path!["units"],
                Value::map([("b", Value::Int(2)), ("z", Value::Int(26))]),
            )
            .unwrap();
        let ops: Vec<(Vec<PathKey>, DeltaOp)> = graph
            .pending()
            .iter()
            .map(|d| (d.path.clone(), d.op))
            .collect();
        assert_eq!(
            ops,
            vec![
                (path!["units", "a"], DeltaOp::RemoveKey),
                (path!["units", "c"], DeltaOp::RemoveKey),
                (path!["units", "z"], DeltaOp::PutKey),
            ]
        );
    }

    #[test]
    fn list_reassignment_diffs_prefix_then_splices_tail() {
        let mut graph = DeltaGraph::new();
        let list = |xs: &[i64]| Value::List(xs.iter().map(|x| Value::Int(*x)).collect());
        graph.set(&path!["xs"], list(&[1, 2, 3, 4])).unwrap();
        let base = graph.to_value();
        graph.flush();

        graph.set(&path!["xs"], list(&[1, 5])).unwrap();
        assert_eq!(
            graph.pending(),
            &[
                Delta {
                    path: path!["xs", 1usize],
                    op: DeltaOp::Set,
                    value: Value::Int(5),
                },
                Delta {
                    path: path!["xs"],
                    op: DeltaOp::Splice {
                        index: 2,
                        remove: 2
                    },
                    value: Value::List(vec![]),
                },
            ]
        );

        graph.set(&path!["xs"], list(&[1, 5, 6])).unwrap();
        let deltas = graph.flush();
        assert_eq!(replay(&base, &deltas), graph.to_value());
        assert_eq!(graph.get(&path!["xs"]), Some(list(&[1, 5, 6])));
    }

    #[test]
    fn removing_absent_key_is_a_no_op() {
        let mut graph = DeltaGraph::new();
        graph.set(&path!["units"], units()).unwrap();
        graph.flush();
        graph.remove_key(&path!["units"], "nope").unwrap();
        assert!(graph.pending().is_empty());
    }

    #[test]
    fn kind_changes_are_structural_errors() {
        let mut graph = DeltaGraph::new();
        graph.set(&path!["xs"], Value::List(vec![])).unwrap();
        graph.set(&path!["n"], Value::Int(1)).unwrap();
        graph.flush();

        assert!(matches!(
            graph.set(&path!["xs"], Value::Int(1)),
            Err(StructuralInvariantError::KindChanged {
                from: Kind::List,
                to: Kind::Scalar,
                ..
            })
        ));
        assert!(matches!(
            graph.set(&path!["n"], Value::List(vec![])),
            Err(StructuralInvariantError::KindChanged { .. })
        ));
        assert!(matches!(
            graph.put_key(&path!["xs"], "k", Value::Null),
            Err(StructuralInvariantError::KindChanged { .. })
        ));
        assert!(matches!(
            graph.set(&path!["missing", "x"], Value::Null),
            Err(StructuralInvariantError::MissingContainer { .. })
        ));
        assert!(graph.pending().is_empty());
    }

    #[test]
    fn rollback_restores_state_and_pending_buffer() {
        let mut graph = DeltaGraph::new();
        graph.set(&path!["units"], units()).unwrap();
        graph.set(&path!["log"], Value::List(vec![Value::from("a")])).unwrap();
        let before_state = graph.to_value();
        let before_pending = graph.pending().to_vec();

        let cp = graph.checkpoint();
        graph.set(&path!["units", "a"], Value::Int(100)).unwrap();
        graph.remove_key(&path!["units"], "b").unwrap();
        graph.put_key(&path!["units"], "new", Value::map([("x", 1)])).unwrap();
        graph.push(&path!["log"], Value::from("b")).unwrap();
        graph.splice(&path!["log"], 0, 1, vec![]).unwrap();
        graph.set(&path!["extra"], Value::Bool(true)).unwrap();
        graph.rollback(cp).unwrap();

        assert_eq!(graph.to_value(), before_state);
        assert_eq!(graph.pending(), before_pending.as_slice());
    }

    #[test]
    fn out_of_range_splice_is_rejected() {
        let mut graph = DeltaGraph::new();
        graph.set(&path!["xs"], Value::List(vec![Value::Int(1)])).unwrap();
        assert!(matches!(
            graph.splice(&path!["xs"], 1, 1, vec![]),
            Err(StructuralInvariantError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn wire_deltas_carry_ids_not_objects() {
        let mut graph = DeltaGraph::new();
        graph
            .set(&path!["owner"], Value::Object(ObjectId::from("G-3")))
            .unwrap();
        let wire = graph.flush()[0].to_wire();
        assert_eq!(wire.value, serde_json::json!("G-3"));
        assert_eq!(wire.op, DeltaOp::PutKey);
    }

    #[test]
    fn snapshot_plus_wire_deltas_tracks_state() {
        let mut graph = DeltaGraph::new();
        graph.set(&path!["units"], units()).unwrap();
        graph.flush();
        let snapshot = graph.snapshot();

        graph.set(&path!["units", "a"], Value::Int(0)).unwrap();
        graph.set(&path!["units"], Value::map([("a", 0)])).unwrap();

        let mut mirror = DeltaGraph::from_value(serializer::untyped(&snapshot)).unwrap();
        for delta in graph.flush() {
            mirror.apply(&Delta::from_wire(&delta.to_wire())).unwrap();
        }
        assert_eq!(mirror.snapshot(), graph.snapshot());
    }
}
