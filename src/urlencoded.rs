use indexmap::IndexMap;
use percent_encoding::percent_decode;
use tracing::trace;

use crate::types::{next_index, FieldMap, FormValue, Key, Node};

/// Deepest bracket nesting accepted; deeper keys are dropped.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Decode a url-encoded body. Later pairs overwrite earlier ones.
pub fn decode(body: &[u8]) -> FieldMap {
    let mut out = FieldMap::new();
    for pair in body.split(|&b| b == b'&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match memchr::memchr(b'=', pair) {
            Some(eq) => (&pair[..eq], &pair[eq + 1..]),
            None => (pair, &[][..]),
        };
        register(&mut out, &decode_component(key), decode_component(value));
    }
    out
}

fn decode_component(raw: &[u8]) -> String {
    let spaced: Vec<u8> = raw
        .iter()
        .map(|&b| if b == b'+' { b' ' } else { b })
        .collect();
    percent_decode(&spaced).decode_utf8_lossy().into_owned()
}

/// Bracket path of a key. `None` segments are `[]` appends.
struct KeyPath {
    base: String,
    segments: Vec<Option<String>>,
}

fn parse_key(key: &str) -> Option<KeyPath> {
    let key = key.trim_start_matches(' ');
    let open = key.find('[');
    let base_end = open.unwrap_or(key.len());
    let mut base: String = key[..base_end]
        .chars()
        .map(|c| if c == ' ' || c == '.' { '_' } else { c })
        .collect();
    if base.is_empty() {
        return None;
    }

    let mut segments = Vec::new();
    if let Some(open) = open {
        let mut rest = &key[open..];
        while let Some(inner) = rest.strip_prefix('[') {
            if let Some(after) = inner.strip_prefix(']') {
                segments.push(None);
                rest = after;
                continue;
            }
            match inner.find(']') {
                Some(close) => {
                    segments.push(Some(inner[..close].to_owned()));
                    rest = &inner[close + 1..];
                }
                None => {
                    if segments.is_empty() {
                        // not an index after all: the bracket joins the name
                        base.push('_');
                        base.push_str(inner);
                    }
                    break;
                }
            }
        }
    }
    Some(KeyPath { base, segments })
}

fn register(out: &mut FieldMap, key: &str, value: String) {
    let Some(path) = parse_key(key) else {
        trace!(key, "dropping pair with empty name");
        return;
    };
    if path.segments.len() > MAX_NESTING_DEPTH {
        trace!(key, depth = path.segments.len(), "dropping pair nested too deep");
        return;
    }
    if path.segments.is_empty() {
        out.insert(path.base, Node::Leaf(value));
        return;
    }
    let slot = out
        .entry(path.base)
        .or_insert_with(|| Node::Container(IndexMap::new()));
    assign(slot, &path.segments, value);
}

fn assign(node: &mut FormValue, segments: &[Option<String>], value: String) {
    if let Node::Leaf(_) = node {
        *node = Node::Container(IndexMap::new());
    }
    let Node::Container(map) = node else {
        return;
    };
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    let key = match first {
        None => match next_index(map) {
            Some(idx) => Key::Index(idx),
            None => {
                trace!("dropping append past the largest index");
                return;
            }
        },
        Some(segment) => Key::from_segment(segment),
    };
    if rest.is_empty() {
        map.insert(key, Node::Leaf(value));
        return;
    }
    let child = map
        .entry(key)
        .or_insert_with(|| Node::Container(IndexMap::new()));
    assign(child, rest, value);
}
