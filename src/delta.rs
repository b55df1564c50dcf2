//! The delta algebra (spec §4.1): the nine-tag operation language plus its
//! `empty`/`is_empty`/`merge`/`apply` semantics.

use crate::path::{Path, Segment};
use crate::value::Value;
use std::collections::BTreeMap;

/// The argument to a `$splice` entry: `[start, deleteCount, ...items]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Splice {
    pub start: usize,
    pub delete_count: usize,
    pub items: Vec<Value>,
}

/// `$pop`'s argument: `1` removes the last element, `-1` removes the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopEnd {
    Last,
    First,
}

impl PopEnd {
    pub fn as_i8(self) -> i8 {
        match self {
            PopEnd::Last => 1,
            PopEnd::First => -1,
        }
    }
}

/// A partial mapping over the nine operation tags (spec §3 "Delta").
///
/// All nine maps are always present (possibly empty) — `empty()` is just
/// `Delta::default()`. Per-tag iteration order is `Path`'s `Ord`, which is
/// deterministic but, per spec, not meaningful: "Per-path within a tag order
/// is implementation-defined; tests must not depend on it."
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    pub set: BTreeMap<Path, Value>,
    pub unset: BTreeMap<Path, ()>,
    pub push: BTreeMap<Path, Value>,
    pub append: BTreeMap<Path, Vec<Value>>,
    pub prepend: BTreeMap<Path, Vec<Value>>,
    pub pop: BTreeMap<Path, PopEnd>,
    pub pull: BTreeMap<Path, Value>,
    pub add_to_set: BTreeMap<Path, Value>,
    pub splice: BTreeMap<Path, Splice>,
}

impl Delta {
    pub fn empty() -> Self {
        Delta::default()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.unset.is_empty()
            && self.push.is_empty()
            && self.append.is_empty()
            && self.prepend.is_empty()
            && self.pop.is_empty()
            && self.pull.is_empty()
            && self.add_to_set.is_empty()
            && self.splice.is_empty()
    }

    /// Union `other` into `self` in place; on a path collision within one
    /// tag, `other`'s value wins (it is the "source" in merge's terms).
    pub fn merge_from(&mut self, other: Delta) {
        self.set.extend(other.set);
        self.unset.extend(other.unset);
        self.push.extend(other.push);
        self.append.extend(other.append);
        self.prepend.extend(other.prepend);
        self.pop.extend(other.pop);
        self.pull.extend(other.pull);
        self.add_to_set.extend(other.add_to_set);
        self.splice.extend(other.splice);
    }

    /// Owned-returning form of `merge_from`, matching the spec's
    /// `merge(target, source) -> delta` signature.
    pub fn merge(target: &Delta, source: &Delta) -> Delta {
        let mut merged = target.clone();
        merged.merge_from(source.clone());
        merged
    }

    pub fn set_at(&mut self, path: Path, value: Value) {
        self.set.insert(path, value);
    }

    pub fn unset_at(&mut self, path: Path) {
        self.unset.insert(path, ());
    }

    pub fn push_at(&mut self, path: Path, value: Value) {
        self.push.insert(path, value);
    }

    pub fn append_at(&mut self, path: Path, values: Vec<Value>) {
        self.append.insert(path, values);
    }

    pub fn prepend_at(&mut self, path: Path, values: Vec<Value>) {
        self.prepend.insert(path, values);
    }

    pub fn pop_at(&mut self, path: Path, end: PopEnd) {
        self.pop.insert(path, end);
    }

    pub fn splice_at(&mut self, path: Path, splice: Splice) {
        self.splice.insert(path, splice);
    }
}

/// Resolve `path` against `root`, returning `None` if any intermediate
/// segment is absent or not the expected container kind. Used by
/// `$unset`/`$push`/`$append`/`$prepend`/`$pop`/`$splice`, none of which
/// create missing containers.
fn resolve_mut<'a>(root: &'a mut Value, path: &Path) -> Option<&'a mut Value> {
    let mut cur = root;
    for seg in path.segments() {
        cur = match (seg, cur) {
            (Segment::Key(k), Value::Object(fields)) => {
                &mut fields.iter_mut().find(|(fk, _)| fk == k)?.1
            }
            (Segment::Index(i), Value::Array(items)) => items.get_mut(*i)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Like `resolve_mut`, but creates `Object`/`Array` intermediates on demand
/// (spec: "`$set` writes traversing absent keys" create intermediates). If
/// an intermediate exists but is the wrong container kind for the next
/// segment, it is overwritten.
fn ensure_mut<'a>(root: &'a mut Value, path: &Path) -> &'a mut Value {
    let mut cur = root;
    for seg in path.segments() {
        cur = match seg {
            Segment::Key(k) => {
                if !matches!(cur, Value::Object(_)) {
                    *cur = Value::Object(Vec::new());
                }
                let Value::Object(fields) = cur else { unreachable!() };
                if !fields.iter().any(|(fk, _)| fk == k) {
                    fields.push((k.clone(), Value::Null));
                }
                &mut fields.iter_mut().find(|(fk, _)| fk == k).unwrap().1
            }
            Segment::Index(i) => {
                if !matches!(cur, Value::Array(_)) {
                    *cur = Value::Array(Vec::new());
                }
                let Value::Array(items) = cur else { unreachable!() };
                if *i >= items.len() {
                    items.resize(*i + 1, Value::Null);
                }
                &mut items[*i]
            }
        };
    }
    cur
}

fn apply_set(root: &mut Value, path: &Path, value: Value) {
    if path.is_root() {
        *root = value;
        return;
    }
    let (parent, last) = split_last(path);
    let parent_value = ensure_mut(root, &parent);
    match last {
        Segment::Key(k) => parent_value.set_field(&k, value),
        Segment::Index(i) => {
            if !matches!(parent_value, Value::Array(_)) {
                *parent_value = Value::Array(Vec::new());
            }
            if let Value::Array(items) = parent_value {
                if i >= items.len() {
                    items.resize(i + 1, Value::Null);
                }
                items[i] = value;
            }
        }
    }
}

fn apply_unset(root: &mut Value, path: &Path) {
    if path.is_root() {
        return;
    }
    let (parent, last) = split_last(path);
    let Some(parent_value) = resolve_mut(root, &parent) else {
        return; // no-op on absent path
    };
    match last {
        Segment::Key(k) => parent_value.remove_field(&k),
        Segment::Index(i) => {
            if let Value::Array(items) = parent_value {
                if i < items.len() {
                    items.remove(i);
                }
            }
        }
    }
}

fn split_last(path: &Path) -> (Path, Segment) {
    let mut segments = path.segments().to_vec();
    let last = segments.pop().expect("split_last called on root path");
    (Path(segments), last)
}

fn as_array_target<'a>(root: &'a mut Value, path: &Path) -> Option<&'a mut Vec<Value>> {
    resolve_mut(root, path)?.as_array_mut()
}

/// Apply `delta` to `value`, producing a new value. Tags execute in the
/// fixed order `$set, $unset, $push, $append, $prepend, $pop, $splice`;
/// `$pull` and `$addToSet` are reserved (spec §4.1) and not applied here —
/// a downstream applier that wants them must tolerate either but this core
/// `apply` never emits or consumes them.
pub fn apply(value: &Value, delta: &Delta) -> Value {
    let mut out = value.clone();

    for (path, v) in &delta.set {
        apply_set(&mut out, path, v.clone());
    }
    for path in delta.unset.keys() {
        apply_unset(&mut out, path);
    }
    for (path, v) in &delta.push {
        if let Some(items) = as_array_target(&mut out, path) {
            items.push(v.clone());
        } else {
            log::debug!("$push at {path} targets a missing or non-sequence container, skipping");
        }
    }
    for (path, values) in &delta.append {
        if let Some(items) = as_array_target(&mut out, path) {
            items.extend(values.iter().cloned());
        } else {
            log::debug!("$append at {path} targets a missing or non-sequence container, skipping");
        }
    }
    for (path, values) in &delta.prepend {
        if let Some(items) = as_array_target(&mut out, path) {
            for (offset, v) in values.iter().cloned().enumerate() {
                items.insert(offset, v);
            }
        } else {
            log::debug!("$prepend at {path} targets a missing or non-sequence container, skipping");
        }
    }
    for (path, end) in &delta.pop {
        if let Some(items) = as_array_target(&mut out, path) {
            match end {
                PopEnd::Last => {
                    items.pop();
                }
                PopEnd::First => {
                    if !items.is_empty() {
                        items.remove(0);
                    }
                }
            }
        }
    }
    for (path, splice) in &delta.splice {
        if let Some(items) = as_array_target(&mut out, path) {
            let start = splice.start.min(items.len());
            let end = (start + splice.delete_count).min(items.len());
            items.splice(start..end, splice.items.iter().cloned());
        } else {
            log::debug!("$splice at {path} targets a missing or non-sequence container, skipping");
        }
    }

    out
}
