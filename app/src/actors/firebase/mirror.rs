//! Local copy of the subscribed node, kept current from `put`/`patch`
//! events. Paths are relative to the subscribed node (`/` = the node).

use serde_json::{Map, Value};

use evdash::SourceEvent;

#[derive(Debug, Default)]
pub struct RecordMirror {
    root: Value,
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

impl RecordMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the value at `path`. `null` deletes it.
    pub fn put(&mut self, path: &str, data: Value) {
        let segs = segments(path);
        set(&mut self.root, &segs, data);
    }

    /// Merge each child of `data` under `path`. Returns false (and changes
    /// nothing) when `data` is not an object.
    pub fn patch(&mut self, path: &str, data: Value) -> bool {
        let Value::Object(children) = data else {
            return false;
        };
        let base = segments(path);
        for (key, value) in children {
            let mut segs = base.clone();
            segs.extend(segments(&key));
            set(&mut self.root, &segs, value);
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        match &self.root {
            Value::Null => true,
            Value::Object(m) => m.is_empty(),
            _ => false,
        }
    }

    /// The callback this state corresponds to.
    pub fn event(&self) -> SourceEvent {
        if self.is_empty() {
            SourceEvent::Empty
        } else {
            SourceEvent::Sample {
                record: self.root.clone(),
            }
        }
    }
}

fn set(node: &mut Value, path: &[&str], data: Value) {
    let Some((head, rest)) = path.split_first() else {
        *node = data;
        return;
    };
    if !node.is_object() {
        if data.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };
    if rest.is_empty() {
        if data.is_null() {
            map.remove(*head);
        } else {
            map.insert(head.to_string(), data);
        }
        return;
    }
    let child = map.entry(head.to_string()).or_insert(Value::Null);
    set(child, rest, data);
    if child.is_null() || child.as_object().is_some_and(Map::is_empty) {
        map.remove(*head);
    }
}
