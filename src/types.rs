use std::fmt;

use indexmap::IndexMap;

/// Key of an ordered container level: integer index or string name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Index(i64),
    Name(String),
}

impl Key {
    /// Canonical decimal integers (`0`, `42`, `-3`) become indexes, anything
    /// else (`05`, `+1`, `1.0`, `a`) stays a name.
    pub fn from_segment(segment: &str) -> Key {
        if is_canonical_int(segment) {
            if let Ok(n) = segment.parse::<i64>() {
                return Key::Index(n);
            }
        }
        Key::Name(segment.to_owned())
    }

    pub fn as_index(&self) -> Option<i64> {
        match self {
            Key::Index(n) => Some(*n),
            Key::Name(_) => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Key::Index(_) => None,
            Key::Name(s) => Some(s),
        }
    }
}

fn is_canonical_int(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    if digits == "0" {
        return !s.starts_with('-');
    }
    !digits.starts_with('0')
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(n) => write!(f, "{n}"),
            Key::Name(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Index(n)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Name(s.to_owned())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Name(s)
    }
}

/// Index an appended entry receives: one past the largest integer key, or 0.
/// `None` once `i64::MAX` is taken.
pub fn next_index<V>(map: &IndexMap<Key, V>) -> Option<i64> {
    match map.keys().filter_map(Key::as_index).max() {
        Some(n) => n.checked_add(1).map(|next| next.max(0)),
        None => Some(0),
    }
}

/// Append under the next integer index. Returns `false`, leaving the map
/// untouched, when no index is left.
pub fn push<V>(map: &mut IndexMap<Key, V>, value: V) -> bool {
    match next_index(map) {
        Some(idx) => {
            map.insert(Key::Index(idx), value);
            true
        }
        None => false,
    }
}

/// A recursive tree: a scalar leaf or an ordered container that may mix
/// integer and string keys at the same level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node<V> {
    Leaf(V),
    Container(IndexMap<Key, Node<V>>),
}

impl<V> Node<V> {
    pub fn leaf(value: V) -> Self {
        Node::Leaf(value)
    }

    /// Container with keys `0..n`.
    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Node<V>>,
    {
        let mut map = IndexMap::new();
        for item in items {
            push(&mut map, item);
        }
        Node::Container(map)
    }

    /// Container from explicit keys, in the given order.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<Key>,
        I: IntoIterator<Item = (K, Node<V>)>,
    {
        Node::Container(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_leaf(&self) -> Option<&V> {
        match self {
            Node::Leaf(v) => Some(v),
            Node::Container(_) => None,
        }
    }

    pub fn as_container(&self) -> Option<&IndexMap<Key, Node<V>>> {
        match self {
            Node::Leaf(_) => None,
            Node::Container(map) => Some(map),
        }
    }

    /// Child at `key`; `None` for leaves and missing keys.
    pub fn get(&self, key: impl Into<Key>) -> Option<&Node<V>> {
        self.as_container()?.get(&key.into())
    }

    pub fn len(&self) -> usize {
        match self {
            Node::Leaf(_) => 1,
            Node::Container(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A decoded form value: text or a nested ordered map.
pub type FormValue = Node<String>;

/// Top-level field map of a decoded body, keyed by field name.
pub type FieldMap = IndexMap<String, FormValue>;

impl FormValue {
    pub fn as_str(&self) -> Option<&str> {
        self.as_leaf().map(String::as_str)
    }
}

impl From<&str> for FormValue {
    fn from(s: &str) -> Self {
        Node::Leaf(s.to_owned())
    }
}

impl From<String> for FormValue {
    fn from(s: String) -> Self {
        Node::Leaf(s)
    }
}
