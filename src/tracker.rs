//! The mutation tracker (spec §4.2).
//!
//! Design Notes §9 offers two translations for "transparent proxy
//! wrappers": a real proxy (not available in Rust) or "a builder-style
//! interface (`mutator(record).at(path).set(v)`) that records the same
//! delta." This module is the builder-style translation: `Tracker` owns the
//! record, `Cursor` is the builder returned by `Tracker::at`.
//!
//! The record is stored as an arena of `Node`s addressed by `NodeId` rather
//! than as a `Value` tree, specifically so it can tolerate cycles the way
//! spec §4.2 requires ("Cycles are tolerated... a node encountered twice
//! yields the same wrapper"). A `NodeId` is just an index, so two fields can
//! point at the same node (or an ancestor) without Rust's ownership rules
//! caring — there is no recursive `Drop` to worry about, unlike an `Rc`
//! cycle. Converting an arena node back to a plain acyclic `Value` (for
//! `get_delta`'s snapshots, or for handing the final record to a caller)
//! uses a visited-set guard so a cycle is serialized as a terminating,
//! truncated tree rather than looping forever — see `to_value`.

use crate::delta::{Delta, PopEnd, Splice};
use crate::path::{Path, Segment};
use crate::value::{Opaque, Value};
use std::cmp::Ordering;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeId(usize);

#[derive(Debug, Clone, PartialEq)]
enum Leaf {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Opaque(Opaque),
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(Leaf),
    Array(Vec<NodeId>),
    Object(Vec<(String, NodeId)>),
    Set(Vec<NodeId>),
    Map(Vec<(NodeId, NodeId)>),
}

fn push_node(arena: &mut Vec<Node>, node: Node) -> NodeId {
    arena.push(node);
    NodeId(arena.len() - 1)
}

/// Build a fresh arena subtree for `value`, returning its root `NodeId`.
/// `value` is an ordinary acyclic `Value`, so this recursion always
/// terminates on its own.
fn build(arena: &mut Vec<Node>, value: &Value) -> NodeId {
    let node = match value {
        Value::Null => Node::Leaf(Leaf::Null),
        Value::Bool(b) => Node::Leaf(Leaf::Bool(*b)),
        Value::Int(n) => Node::Leaf(Leaf::Int(*n)),
        Value::Float(n) => Node::Leaf(Leaf::Float(*n)),
        Value::Str(s) => Node::Leaf(Leaf::Str(s.clone())),
        Value::Opaque(o) => Node::Leaf(Leaf::Opaque(o.clone())),
        Value::Array(items) => {
            let ids = items.iter().map(|v| build(arena, v)).collect();
            Node::Array(ids)
        }
        Value::Object(fields) => {
            let pairs = fields.iter().map(|(k, v)| (k.clone(), build(arena, v))).collect();
            Node::Object(pairs)
        }
        Value::Set(items) => {
            let ids = items.iter().map(|v| build(arena, v)).collect();
            Node::Set(ids)
        }
        Value::Map(entries) => {
            let pairs = entries
                .iter()
                .map(|(k, v)| (build(arena, k), build(arena, v)))
                .collect();
            Node::Map(pairs)
        }
    };
    push_node(arena, node)
}

/// Serialize the node at `id` back into a plain `Value`. Breaks cycles by
/// tracking the current recursion path: revisiting a node already on that
/// path truncates to `Value::Null` instead of recursing forever (spec:
/// "wrapping a record that references itself terminates").
fn to_value(arena: &[Node], id: NodeId) -> Value {
    let mut on_path = HashSet::new();
    to_value_guarded(arena, id, &mut on_path)
}

fn to_value_guarded(arena: &[Node], id: NodeId, on_path: &mut HashSet<NodeId>) -> Value {
    if !on_path.insert(id) {
        return Value::Null;
    }
    let result = match &arena[id.0] {
        Node::Leaf(Leaf::Null) => Value::Null,
        Node::Leaf(Leaf::Bool(b)) => Value::Bool(*b),
        Node::Leaf(Leaf::Int(n)) => Value::Int(*n),
        Node::Leaf(Leaf::Float(n)) => Value::Float(*n),
        Node::Leaf(Leaf::Str(s)) => Value::Str(s.clone()),
        Node::Leaf(Leaf::Opaque(o)) => Value::Opaque(o.clone()),
        Node::Array(ids) => Value::Array(ids.iter().map(|i| to_value_guarded(arena, *i, on_path)).collect()),
        Node::Object(pairs) => Value::Object(
            pairs
                .iter()
                .map(|(k, i)| (k.clone(), to_value_guarded(arena, *i, on_path)))
                .collect(),
        ),
        Node::Set(ids) => Value::Set(ids.iter().map(|i| to_value_guarded(arena, *i, on_path)).collect()),
        Node::Map(pairs) => Value::Map(
            pairs
                .iter()
                .map(|(k, v)| (to_value_guarded(arena, *k, on_path), to_value_guarded(arena, *v, on_path)))
                .collect(),
        ),
    };
    on_path.remove(&id);
    result
}

fn resolve(arena: &[Node], root: NodeId, path: &Path) -> Option<NodeId> {
    let mut cur = root;
    for seg in path.segments() {
        cur = match (seg, &arena[cur.0]) {
            (Segment::Key(k), Node::Object(fields)) => fields.iter().find(|(fk, _)| fk == k).map(|(_, id)| *id)?,
            (Segment::Index(i), Node::Array(ids)) => *ids.get(*i)?,
            _ => return None,
        };
    }
    Some(cur)
}

fn ensure_object_field(arena: &mut Vec<Node>, node: NodeId, key: &str) -> NodeId {
    if !matches!(arena[node.0], Node::Object(_)) {
        arena[node.0] = Node::Object(Vec::new());
    }
    let existing = match &arena[node.0] {
        Node::Object(fields) => fields.iter().find(|(fk, _)| fk == key).map(|(_, id)| *id),
        _ => unreachable!(),
    };
    if let Some(id) = existing {
        return id;
    }
    let new_id = push_node(arena, Node::Leaf(Leaf::Null));
    if let Node::Object(fields) = &mut arena[node.0] {
        fields.push((key.to_string(), new_id));
    }
    new_id
}

fn ensure_array_index(arena: &mut Vec<Node>, node: NodeId, index: usize) -> NodeId {
    if !matches!(arena[node.0], Node::Array(_)) {
        arena[node.0] = Node::Array(Vec::new());
    }
    let len = match &arena[node.0] {
        Node::Array(ids) => ids.len(),
        _ => unreachable!(),
    };
    if index >= len {
        for _ in len..=index {
            let null_id = push_node(arena, Node::Leaf(Leaf::Null));
            if let Node::Array(ids) = &mut arena[node.0] {
                ids.push(null_id);
            }
        }
    }
    match &arena[node.0] {
        Node::Array(ids) => ids[index],
        _ => unreachable!(),
    }
}

fn resolve_create(arena: &mut Vec<Node>, root: NodeId, path: &Path) -> NodeId {
    let mut cur = root;
    for seg in path.segments() {
        cur = match seg {
            Segment::Key(k) => ensure_object_field(arena, cur, k),
            Segment::Index(i) => ensure_array_index(arena, cur, *i),
        };
    }
    cur
}

fn set_object_field(arena: &mut Vec<Node>, node: NodeId, key: &str, value: NodeId) {
    if !matches!(arena[node.0], Node::Object(_)) {
        arena[node.0] = Node::Object(Vec::new());
    }
    if let Node::Object(fields) = &mut arena[node.0] {
        if let Some(entry) = fields.iter_mut().find(|(fk, _)| fk == key) {
            entry.1 = value;
        } else {
            fields.push((key.to_string(), value));
        }
    }
}

fn remove_object_field(arena: &mut Vec<Node>, node: NodeId, key: &str) {
    if let Node::Object(fields) = &mut arena[node.0] {
        fields.retain(|(fk, _)| fk != key);
    }
}

fn set_array_index(arena: &mut Vec<Node>, node: NodeId, index: usize, value: NodeId) {
    ensure_array_index(arena, node, index);
    if let Node::Array(ids) = &mut arena[node.0] {
        ids[index] = value;
    }
}

fn array_ids_mut(arena: &mut Vec<Node>, node: NodeId) -> Option<&mut Vec<NodeId>> {
    match &mut arena[node.0] {
        Node::Array(ids) => Some(ids),
        _ => None,
    }
}

fn split_last(path: &Path) -> (Path, Segment) {
    let mut segments = path.segments().to_vec();
    let last = segments.pop().expect("split_last called on root path");
    (Path(segments), last)
}

fn value_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) => 2,
        Value::Float(_) => 3,
        Value::Str(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
        Value::Set(_) => 7,
        Value::Map(_) => 8,
        Value::Opaque(_) => 9,
    }
}

/// A best-effort total order over scalar-ish values, used by `sort()`. The
/// spec does not mandate a particular ordering, only that the resulting
/// `$set` snapshot matches whatever order the tracked sequence ends up in.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => value_rank(a).cmp(&value_rank(b)),
    }
}

/// Wraps a record and accumulates a `Delta` as the record is mutated
/// through `Cursor`s obtained via `at`.
pub struct Tracker {
    arena: Vec<Node>,
    root: NodeId,
    delta: Delta,
}

impl Tracker {
    pub fn new(value: Value) -> Self {
        let mut arena = Vec::new();
        let root = build(&mut arena, &value);
        Tracker {
            arena,
            root,
            delta: Delta::empty(),
        }
    }

    /// The accumulated delta, as a plain copy (spec: "returns the
    /// accumulated delta as a plain copy (empty tags omitted" is satisfied
    /// by `Delta::is_empty` on the per-tag maps; callers that want to omit
    /// empty tags entirely when serializing should check each map).
    pub fn get_delta(&self) -> Delta {
        self.delta.clone()
    }

    /// The current (post-mutation) value of the whole tracked record.
    pub fn value(&self) -> Value {
        to_value(&self.arena, self.root)
    }

    /// Read the current value at `path` without recording anything.
    pub fn peek(&self, path: impl Into<Path>) -> Option<Value> {
        let path = path.into();
        resolve(&self.arena, self.root, &path).map(|id| to_value(&self.arena, id))
    }

    /// Obtain a builder-style cursor at `path`, the non-proxy translation
    /// Design Notes §9 calls for.
    pub fn at(&mut self, path: impl Into<Path>) -> Cursor<'_> {
        Cursor {
            tracker: self,
            path: path.into(),
        }
    }

    /// Make the node at `path` alias the node already resolvable at
    /// `target`, instead of copying it. Rust values don't have the
    /// reference identity JS objects do, so there is no way to hand a test
    /// a record that "references itself" without an explicit aliasing
    /// operation; this is that operation (see DESIGN.md's Open Question
    /// decisions for the cycle-tolerance requirement).
    pub fn link(&mut self, path: impl Into<Path>, target: impl Into<Path>) {
        let path = path.into();
        let target = target.into();
        let Some(target_id) = resolve(&self.arena, self.root, &target) else {
            return;
        };
        if path.is_root() {
            self.root = target_id;
            return;
        }
        let (parent, last) = split_last(&path);
        let parent_id = resolve_create(&mut self.arena, self.root, &parent);
        match last {
            Segment::Key(k) => set_object_field(&mut self.arena, parent_id, &k, target_id),
            Segment::Index(i) => set_array_index(&mut self.arena, parent_id, i, target_id),
        }
    }
}

/// A builder-style handle onto one path within a `Tracker`'s record.
/// Terminal operations (`set`, `push`, `splice`, ...) consume the cursor;
/// `at_key`/`at_index` return a new cursor addressing a child path.
pub struct Cursor<'t> {
    tracker: &'t mut Tracker,
    path: Path,
}

impl<'t> Cursor<'t> {
    pub fn at_key(self, key: impl Into<String>) -> Cursor<'t> {
        let path = self.path.join_key(key);
        Cursor {
            tracker: self.tracker,
            path,
        }
    }

    pub fn at_index(self, index: usize) -> Cursor<'t> {
        let path = self.path.join_index(index);
        Cursor {
            tracker: self.tracker,
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Option<Value> {
        resolve(&self.tracker.arena, self.tracker.root, &self.path).map(|id| to_value(&self.tracker.arena, id))
    }

    /// Assign `value` at this path. A no-op, recording nothing, if the
    /// current value is already equal to `value` (spec: "Equal write ...
    /// no-op").
    pub fn set(self, value: Value) {
        let prev = resolve(&self.tracker.arena, self.tracker.root, &self.path)
            .map(|id| to_value(&self.tracker.arena, id));
        if prev.as_ref() == Some(&value) {
            return;
        }
        if self.path.is_root() {
            self.tracker.arena.clear();
            self.tracker.root = build(&mut self.tracker.arena, &value);
        } else {
            let (parent, last) = split_last(&self.path);
            let parent_id = resolve_create(&mut self.tracker.arena, self.tracker.root, &parent);
            let new_id = build(&mut self.tracker.arena, &value);
            match last {
                Segment::Key(k) => set_object_field(&mut self.tracker.arena, parent_id, &k, new_id),
                Segment::Index(i) => set_array_index(&mut self.tracker.arena, parent_id, i, new_id),
            }
        }
        self.tracker.delta.set_at(self.path, value);
    }

    /// Delete the attribute at this path. No-op on an absent path.
    pub fn unset(self) {
        if self.path.is_root() {
            return;
        }
        let (parent, last) = split_last(&self.path);
        if let Some(parent_id) = resolve(&self.tracker.arena, self.tracker.root, &parent) {
            match last {
                Segment::Key(k) => remove_object_field(&mut self.tracker.arena, parent_id, &k),
                Segment::Index(i) => {
                    if let Some(ids) = array_ids_mut(&mut self.tracker.arena, parent_id) {
                        if i < ids.len() {
                            ids.remove(i);
                        }
                    }
                }
            }
        }
        self.tracker.delta.unset_at(self.path);
    }

    /// `push(x)` for one argument records `$push`; `push(x1, .., xn)` for
    /// more than one lowers to `$append` (spec §4.1/§4.2); zero arguments
    /// record nothing.
    pub fn push(self, mut values: Vec<Value>) {
        if values.is_empty() {
            return;
        }
        let Some(node_id) = resolve(&self.tracker.arena, self.tracker.root, &self.path) else {
            log::warn!("push at {} targets a missing sequence, skipping", self.path);
            return;
        };
        let ids: Vec<NodeId> = values.iter().map(|v| build(&mut self.tracker.arena, v)).collect();
        if let Some(arr) = array_ids_mut(&mut self.tracker.arena, node_id) {
            arr.extend(ids);
        }
        if values.len() == 1 {
            self.tracker.delta.push_at(self.path, values.pop().unwrap());
        } else {
            self.tracker.delta.append_at(self.path, values);
        }
    }

    /// `unshift(x1, .., xn)` always records `$prepend`, even for a single
    /// argument (unlike `push`, see spec §4.2's table).
    pub fn unshift(self, values: Vec<Value>) {
        if values.is_empty() {
            return;
        }
        let Some(node_id) = resolve(&self.tracker.arena, self.tracker.root, &self.path) else {
            log::warn!("unshift at {} targets a missing sequence, skipping", self.path);
            return;
        };
        let ids: Vec<NodeId> = values.iter().map(|v| build(&mut self.tracker.arena, v)).collect();
        if let Some(arr) = array_ids_mut(&mut self.tracker.arena, node_id) {
            for (offset, id) in ids.into_iter().enumerate() {
                arr.insert(offset, id);
            }
        }
        self.tracker.delta.prepend_at(self.path, values);
    }

    pub fn pop(self) {
        if let Some(node_id) = resolve(&self.tracker.arena, self.tracker.root, &self.path) {
            if let Some(arr) = array_ids_mut(&mut self.tracker.arena, node_id) {
                arr.pop();
            }
        }
        self.tracker.delta.pop_at(self.path, PopEnd::Last);
    }

    pub fn shift(self) {
        if let Some(node_id) = resolve(&self.tracker.arena, self.tracker.root, &self.path) {
            if let Some(arr) = array_ids_mut(&mut self.tracker.arena, node_id) {
                if !arr.is_empty() {
                    arr.remove(0);
                }
            }
        }
        self.tracker.delta.pop_at(self.path, PopEnd::First);
    }

    pub fn splice(self, start: usize, delete_count: usize, items: Vec<Value>) {
        if let Some(node_id) = resolve(&self.tracker.arena, self.tracker.root, &self.path) {
            let ids: Vec<NodeId> = items.iter().map(|v| build(&mut self.tracker.arena, v)).collect();
            if let Some(arr) = array_ids_mut(&mut self.tracker.arena, node_id) {
                let s = start.min(arr.len());
                let e = (s + delete_count).min(arr.len());
                arr.splice(s..e, ids);
            }
        }
        self.tracker.delta.splice_at(
            self.path,
            Splice {
                start,
                delete_count,
                items,
            },
        );
    }

    pub fn sort(self) {
        self.reorder(|pairs| pairs.sort_by(|a, b| compare_values(&a.1, &b.1)));
    }

    pub fn reverse(self) {
        self.reorder(|pairs| pairs.reverse());
    }

    fn reorder(self, f: impl FnOnce(&mut Vec<(NodeId, Value)>)) {
        let Some(node_id) = resolve(&self.tracker.arena, self.tracker.root, &self.path) else {
            return;
        };
        let ids: Vec<NodeId> = match &self.tracker.arena[node_id.0] {
            Node::Array(ids) => ids.clone(),
            _ => return,
        };
        let mut pairs: Vec<(NodeId, Value)> = ids
            .into_iter()
            .map(|id| (id, to_value(&self.tracker.arena, id)))
            .collect();
        f(&mut pairs);
        let (new_ids, new_values): (Vec<NodeId>, Vec<Value>) = pairs.into_iter().unzip();
        if let Node::Array(ids) = &mut self.tracker.arena[node_id.0] {
            *ids = new_ids;
        }
        self.tracker.delta.set_at(self.path, Value::Array(new_values));
    }

    fn mutate_collection_op(self, f: impl FnOnce(&mut Vec<Node>, NodeId)) {
        if let Some(node_id) = resolve(&self.tracker.arena, self.tracker.root, &self.path) {
            f(&mut self.tracker.arena, node_id);
            let snapshot = to_value(&self.tracker.arena, node_id);
            self.tracker.delta.set_at(self.path, snapshot);
        } else {
            log::warn!("collection mutator at {} targets a missing container, skipping", self.path);
        }
    }

    pub fn set_add(self, value: Value) {
        self.mutate_collection_op(|arena, node_id| {
            let exists = match &arena[node_id.0] {
                Node::Set(ids) => ids.iter().any(|id| to_value(arena, *id) == value),
                _ => return,
            };
            if exists {
                return;
            }
            let new_id = build(arena, &value);
            if let Node::Set(ids) = &mut arena[node_id.0] {
                ids.push(new_id);
            }
        });
    }

    pub fn set_delete(self, value: Value) {
        self.mutate_collection_op(|arena, node_id| {
            let keep: Vec<NodeId> = match &arena[node_id.0] {
                Node::Set(ids) => ids.iter().filter(|id| to_value(arena, **id) != value).cloned().collect(),
                _ => return,
            };
            arena[node_id.0] = Node::Set(keep);
        });
    }

    pub fn set_clear(self) {
        self.mutate_collection_op(|arena, node_id| {
            if matches!(arena[node_id.0], Node::Set(_)) {
                arena[node_id.0] = Node::Set(Vec::new());
            }
        });
    }

    pub fn map_set(self, key: Value, value: Value) {
        self.mutate_collection_op(|arena, node_id| {
            let existing_pos = match &arena[node_id.0] {
                Node::Map(pairs) => pairs.iter().position(|(k, _)| to_value(arena, *k) == key),
                _ => return,
            };
            let value_id = build(arena, &value);
            if let Some(pos) = existing_pos {
                if let Node::Map(pairs) = &mut arena[node_id.0] {
                    pairs[pos].1 = value_id;
                }
            } else {
                let key_id = build(arena, &key);
                if let Node::Map(pairs) = &mut arena[node_id.0] {
                    pairs.push((key_id, value_id));
                }
            }
        });
    }

    pub fn map_delete(self, key: Value) {
        self.mutate_collection_op(|arena, node_id| {
            let keep: Vec<(NodeId, NodeId)> = match &arena[node_id.0] {
                Node::Map(pairs) => pairs
                    .iter()
                    .filter(|(k, _)| to_value(arena, *k) != key)
                    .cloned()
                    .collect(),
                _ => return,
            };
            arena[node_id.0] = Node::Map(keep);
        });
    }

    pub fn map_clear(self) {
        self.mutate_collection_op(|arena, node_id| {
            if matches!(arena[node_id.0], Node::Map(_)) {
                arena[node_id.0] = Node::Map(Vec::new());
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_single_property_mutation() {
        let mut tracker = Tracker::new(Value::object([("foo", Value::str("bar"))]));
        tracker.at("foo").set(Value::str("baz"));
        let delta = tracker.get_delta();
        assert_eq!(delta.set.get(&Path::key("foo")), Some(&Value::str("baz")));
    }

    #[test]
    fn s2_nested_path() {
        let mut tracker = Tracker::new(Value::object([(
            "nested",
            Value::object([("foo", Value::str("bar"))]),
        )]));
        tracker.at("nested").at_key("foo").set(Value::str("baz"));
        let delta = tracker.get_delta();
        assert_eq!(delta.set.get(&"nested.foo".into()), Some(&Value::str("baz")));
    }

    #[test]
    fn s3_array_splice() {
        let mut tracker = Tracker::new(Value::object([(
            "items",
            Value::Array(vec![Value::str("a"), Value::str("b"), Value::str("c")]),
        )]));
        tracker.at("items").splice(1, 1, vec![Value::str("x"), Value::str("y")]);
        assert_eq!(
            tracker.peek("items"),
            Some(Value::Array(vec![
                Value::str("a"),
                Value::str("x"),
                Value::str("y"),
                Value::str("c"),
            ]))
        );
        let delta = tracker.get_delta();
        let splice = delta.splice.get(&Path::key("items")).unwrap();
        assert_eq!(splice.start, 1);
        assert_eq!(splice.delete_count, 1);
        assert_eq!(splice.items, vec![Value::str("x"), Value::str("y")]);
    }

    #[test]
    fn equal_write_is_noop() {
        let mut tracker = Tracker::new(Value::object([("foo", Value::str("bar"))]));
        tracker.at("foo").set(Value::str("bar"));
        assert!(tracker.get_delta().is_empty());
    }

    #[test]
    fn empty_delta_iff_no_write() {
        let tracker = Tracker::new(Value::object([("foo", Value::str("bar"))]));
        assert!(tracker.get_delta().is_empty());
    }

    #[test]
    fn push_zero_args_records_nothing() {
        let mut tracker = Tracker::new(Value::object([("items", Value::Array(vec![]))]));
        tracker.at("items").push(vec![]);
        assert!(tracker.get_delta().is_empty());
    }

    #[test]
    fn multi_arg_push_lowers_to_append() {
        let mut tracker = Tracker::new(Value::object([("items", Value::Array(vec![]))]));
        tracker.at("items").push(vec![Value::Int(1), Value::Int(2)]);
        let delta = tracker.get_delta();
        assert!(delta.push.is_empty());
        assert_eq!(delta.append.get(&Path::key("items")), Some(&vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn single_arg_push_records_push_not_append() {
        let mut tracker = Tracker::new(Value::object([("items", Value::Array(vec![]))]));
        tracker.at("items").push(vec![Value::Int(1)]);
        let delta = tracker.get_delta();
        assert_eq!(delta.push.get(&Path::key("items")), Some(&Value::Int(1)));
        assert!(delta.append.is_empty());
    }

    #[test]
    fn pop_and_shift_record_distinct_directions() {
        let mut tracker = Tracker::new(Value::object([(
            "items",
            Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        )]));
        tracker.at("items").pop();
        assert_eq!(tracker.get_delta().pop.get(&Path::key("items")), Some(&PopEnd::Last));
        assert_eq!(tracker.peek("items"), Some(Value::Array(vec![Value::Int(1), Value::Int(2)])));
    }

    #[test]
    fn sort_emits_set_with_sorted_snapshot() {
        let mut tracker = Tracker::new(Value::object([(
            "items",
            Value::Array(vec![Value::Int(3), Value::Int(1), Value::Int(2)]),
        )]));
        tracker.at("items").sort();
        let delta = tracker.get_delta();
        assert_eq!(
            delta.set.get(&Path::key("items")),
            Some(&Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))
        );
        // Repeated sort on an already-sorted sequence still emits a $set
        // matching the current state (spec: "Repeated sort() emits repeated
        // $set entries whose value equals the then-current sorted sequence").
        tracker.at("items").sort();
        assert_eq!(
            tracker.get_delta().set.get(&Path::key("items")),
            Some(&Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))
        );
    }

    #[test]
    fn set_add_emits_set_snapshot() {
        let mut tracker = Tracker::new(Value::object([("tags", Value::Set(vec![Value::str("a")]))]));
        tracker.at("tags").set_add(Value::str("b"));
        let delta = tracker.get_delta();
        let snapshot = delta.set.get(&Path::key("tags")).unwrap();
        assert_eq!(snapshot, &Value::Set(vec![Value::str("a"), Value::str("b")]));
    }

    #[test]
    fn writing_leaf_opaque_records_single_set() {
        use chrono::{TimeZone, Utc};
        let original = Utc.timestamp_opt(0, 0).unwrap();
        let updated = Utc.timestamp_opt(1_000, 0).unwrap();
        let mut tracker = Tracker::new(Value::object([("at", Value::Opaque(Opaque::Date(original)))]));
        tracker.at("at").set(Value::Opaque(Opaque::Date(updated)));
        let delta = tracker.get_delta();
        assert_eq!(delta.set.len(), 1);
        assert_eq!(delta.set.get(&Path::key("at")), Some(&Value::Opaque(Opaque::Date(updated))));
    }

    #[test]
    fn cyclic_record_terminates_and_permits_top_level_writes() {
        let mut tracker = Tracker::new(Value::object([("foo", Value::str("bar"))]));
        tracker.link("self", Path::root());
        tracker.at("foo").set(Value::str("baz"));
        // Serializing a self-referential tree must terminate, truncating the
        // back-edge rather than looping forever.
        let snapshot = tracker.value();
        assert_eq!(snapshot.get("foo"), Some(&Value::str("baz")));
        assert_eq!(snapshot.get("self"), Some(&Value::Null));
    }

    #[test]
    fn apply_of_tracked_delta_matches_direct_mutation() {
        let original = Value::object([("foo", Value::str("bar")), ("count", Value::Int(0))]);
        let mut tracker = Tracker::new(original.clone());
        tracker.at("foo").set(Value::str("baz"));
        tracker.at("count").set(Value::Int(1));
        let delta = tracker.get_delta();
        let applied = crate::delta::apply(&original, &delta);
        assert_eq!(applied, tracker.value());
    }
}
