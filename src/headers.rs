use std::fmt;

use indexmap::IndexMap;
use tracing::trace;

use crate::types::Key;

/// Blank-line markers separating a header section from its body. At a given
/// offset they are tried in this order.
const BLANK_LINES: [&[u8]; 3] = [b"\r\n\r\n", b"\n\n", b"\r\r"];

/// Split a part into its header section and body at the first blank line.
///
/// The header section has every run of `\r`/`\n` collapsed to one `\n` and is
/// trimmed; the body is returned untouched. Without a blank line the whole
/// input is headers and the body is empty.
pub fn split_from_body(data: &[u8]) -> (String, &[u8]) {
    let (head, body) = match find_blank_line(data) {
        Some((pos, len)) => (&data[..pos], &data[pos + len..]),
        None => (data, &[][..]),
    };
    (canonical_newlines(head).trim().to_owned(), body)
}

/// Offset and length of the earliest blank-line marker.
fn find_blank_line(data: &[u8]) -> Option<(usize, usize)> {
    memchr::memchr2_iter(b'\r', b'\n', data).find_map(|pos| {
        BLANK_LINES
            .iter()
            .find(|marker| data[pos..].starts_with(marker))
            .map(|marker| (pos, marker.len()))
    })
}

fn canonical_newlines(data: &[u8]) -> String {
    let mut out = Vec::with_capacity(data.len());
    let mut in_break = false;
    for &b in data {
        if b == b'\r' || b == b'\n' {
            if !in_break {
                out.push(b'\n');
                in_break = true;
            }
        } else {
            out.push(b);
            in_break = false;
        }
    }
    bytes_to_string(&out)
}

/// Trim spaces, tabs, line breaks, NUL and vertical tab from both ends.
pub(crate) fn trim_blank(b: &[u8]) -> &[u8] {
    let blank = |c: &u8| matches!(*c, b' ' | b'\t' | b'\n' | b'\r' | b'\0' | b'\x0B');
    let start = b.iter().position(|c| !blank(c)).unwrap_or(b.len());
    let end = b.iter().rposition(|c| !blank(c)).map_or(start, |i| i + 1);
    &b[start..end]
}

pub(crate) fn bytes_to_string(b: &[u8]) -> String {
    match std::str::from_utf8(b) {
        Ok(s) => s.to_owned(),
        Err(_) => String::from_utf8_lossy(b).into_owned(),
    }
}

/// Ordered attributes of one header value, e.g.
/// `form-data; name="foo"; filename="bar.txt"`.
///
/// Bare tokens are numbered `0, 1, ...` among themselves; `key=value` tokens
/// are stored under their literal key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderAttributes {
    entries: IndexMap<Key, String>,
    bare_count: i64,
}

impl HeaderAttributes {
    pub fn get(&self, key: impl Into<Key>) -> Option<&str> {
        self.entries.get(&key.into()).map(String::as_str)
    }

    pub fn has(&self, key: impl Into<Key>) -> bool {
        self.entries.contains_key(&key.into())
    }

    /// Bare token at `idx`.
    pub fn bare(&self, idx: i64) -> Option<&str> {
        self.get(Key::Index(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &str)> {
        self.entries.iter().map(|(k, v)| (k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push_bare(&mut self, value: impl Into<String>) {
        self.entries.insert(Key::Index(self.bare_count), value.into());
        self.bare_count += 1;
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(Key::Name(key.into()), value.into());
    }

    /// Append `other`: keyed entries overwrite in place, bare entries are
    /// renumbered after ours.
    pub fn merge(&mut self, other: &HeaderAttributes) {
        for (key, value) in &other.entries {
            match key {
                Key::Index(_) => self.push_bare(value.clone()),
                Key::Name(name) => self.insert(name.clone(), value.clone()),
            }
        }
    }
}

/// Parse one header value into its attributes.
pub fn parse_value(value: &str) -> HeaderAttributes {
    let mut attrs = HeaderAttributes::default();
    for token in value.split(';') {
        let token = token.trim();
        match token.split_once('=') {
            None => attrs.push_bare(token),
            Some((key, value)) => attrs.insert(key.trim(), unquote(value.trim())),
        }
    }
    attrs
}

fn unquote(value: &str) -> &str {
    if value == "\"" {
        return "";
    }
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner.trim(),
        None => value,
    }
}

fn needs_quotes(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '=' | '"'))
}

/// Formats as `bare; key=value; key="quoted value"`.
///
/// Parsing the output gives back the same attributes as long as no key or
/// value contains `;`, bare tokens contain no `=`, and nothing has leading or
/// trailing whitespace.
impl fmt::Display for HeaderAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            match key {
                Key::Index(_) => f.write_str(value)?,
                Key::Name(name) if needs_quotes(value) => write!(f, "{name}=\"{value}\"")?,
                Key::Name(name) => write!(f, "{name}={value}")?,
            }
        }
        Ok(())
    }
}

/// Header block keyed by lower-cased name; repeated headers keep every value
/// in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    headers: IndexMap<String, Vec<String>>,
}

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, N, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: Into<String>,
    {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.as_ref(), value.into());
        }
        map
    }

    fn append(&mut self, name: &str, value: String) {
        self.headers
            .entry(normalize_name(name))
            .or_default()
            .push(value);
    }

    /// Raw values of `name`, empty if absent.
    pub fn get(&self, name: &str) -> &[String] {
        self.headers
            .get(&normalize_name(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Values of `name` joined by `", "`.
    pub fn get_line(&self, name: &str) -> String {
        self.get(name).join(", ")
    }

    pub fn has(&self, name: &str) -> bool {
        self.headers.contains_key(&normalize_name(name))
    }

    /// Attributes of every value of `name`, merged in order.
    pub fn values(&self, name: &str) -> HeaderAttributes {
        let mut out = HeaderAttributes::default();
        for value in self.get(name) {
            out.merge(&parse_value(value));
        }
        out
    }

    pub fn get_value(&self, name: &str, key: impl Into<Key>) -> Option<String> {
        self.values(name).get(key).map(str::to_owned)
    }

    pub fn get_value_or(&self, name: &str, key: impl Into<Key>, default: &str) -> String {
        self.get_value(name, key)
            .unwrap_or_else(|| default.to_owned())
    }

    pub fn has_value(&self, name: &str, key: impl Into<Key>) -> bool {
        self.values(name).has(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Copy with `name` replaced by `values`.
    #[must_use]
    pub fn with<I, V>(&self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let mut out = self.clone();
        out.headers.insert(
            normalize_name(name),
            values.into_iter().map(Into::into).collect(),
        );
        out
    }

    /// Copy with `values` appended to `name`.
    #[must_use]
    pub fn with_added<I, V>(&self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let mut out = self.clone();
        for value in values {
            out.append(name, value.into());
        }
        out
    }

    /// Copy without `name`.
    #[must_use]
    pub fn without(&self, name: &str) -> Self {
        let mut out = self.clone();
        out.headers.shift_remove(&normalize_name(name));
        out
    }
}

/// Parse a header section, one `name: value` per line. Lines without a
/// colon are dropped; folded continuation lines are not supported.
pub fn parse_headers(text: &str) -> HeaderMap {
    let mut map = HeaderMap::new();
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        match line.split_once(':') {
            Some((name, value)) => map.append(name, value.trim().to_owned()),
            None => {
                if !line.trim().is_empty() {
                    trace!(line, "dropping header line without ':'");
                }
            }
        }
    }
    map
}

/// Split a part and parse its header section.
pub fn split_from_body_and_parse(data: &[u8]) -> (HeaderMap, &[u8]) {
    let (head, body) = split_from_body(data);
    (parse_headers(&head), body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_value_bare_and_keyed() {
        let attrs = parse_value(r#"foo; bar=baz; qux="corge grault""#);
        let entries: Vec<_> = attrs.iter().map(|(k, v)| (k.clone(), v.to_owned())).collect();
        assert_eq!(
            entries,
            vec![
                (Key::Index(0), "foo".to_owned()),
                (Key::from("bar"), "baz".to_owned()),
                (Key::from("qux"), "corge grault".to_owned()),
            ]
        );
    }

    #[test]
    fn parse_value_keyed_first() {
        let attrs = parse_value(r#"bar=baz; foo; qux="corge grault""#);
        let keys: Vec<_> = attrs.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![Key::from("bar"), Key::Index(0), Key::from("qux")]);
        assert_eq!(attrs.bare(0), Some("foo"));
    }

    #[test]
    fn bare_counter_ignores_keyed_entries() {
        let attrs = parse_value("a; x=1; b; y=2; c");
        assert_eq!(attrs.bare(0), Some("a"));
        assert_eq!(attrs.bare(1), Some("b"));
        assert_eq!(attrs.bare(2), Some("c"));
        assert_eq!(attrs.get("y"), Some("2"));
    }

    #[test]
    fn splits_on_first_equals_only() {
        let attrs = parse_value("boundary=a=b=c");
        assert_eq!(attrs.get("boundary"), Some("a=b=c"));
    }

    #[test]
    fn quoted_value_is_retrimmed() {
        let attrs = parse_value(r#"name=" spaced ""#);
        assert_eq!(attrs.get("name"), Some("spaced"));
        let attrs = parse_value(r#"filename="""#);
        assert_eq!(attrs.get("filename"), Some(""));
        assert!(attrs.has("filename"));
        let attrs = parse_value(r#"odd=""#);
        assert_eq!(attrs.get("odd"), Some(""));
    }

    #[test]
    fn empty_value_has_one_empty_bare_token() {
        let attrs = parse_value("");
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs.bare(0), Some(""));
    }

    #[test]
    fn format_then_parse_is_stable() {
        let cases: &[(&[&str], &[(&str, &str)], &str)] = &[
            (&["form-data"], &[("name", "foo")], "form-data; name=foo"),
            (&["form-data"], &[("filename", "")], r#"form-data; filename="""#),
            (&[], &[("name", "field one")], r#"name="field one""#),
            (&[], &[("q", "a=b")], r#"q="a=b""#),
            (&[], &[("say", r#"he said "hi""#)], r#"say="he said "hi"""#),
            (&[], &[("lone", "\"")], r#"lone=""""#),
            (&[], &[("open", "\"abc")], r#"open=""abc""#),
            (&["text/plain"], &[("charset", "utf-8")], "text/plain; charset=utf-8"),
            (
                &["a", "b", "c"],
                &[("k", "v"), ("x", "y z")],
                r#"a; b; c; k=v; x="y z""#,
            ),
        ];
        for (bare, keyed, expected) in cases {
            let mut attrs = HeaderAttributes::default();
            for token in *bare {
                attrs.push_bare(*token);
            }
            for (key, value) in *keyed {
                attrs.insert(*key, *value);
            }
            let text = attrs.to_string();
            assert_eq!(&text, expected);
            assert_eq!(parse_value(&text), attrs, "round trip of {text}");
        }
    }

    #[test]
    fn interleaved_bare_and_keyed_round_trip() {
        let attrs = parse_value("form-data; name=a; extra; filename=\"b c.txt\"; last");
        assert_eq!(attrs.bare(0), Some("form-data"));
        assert_eq!(attrs.bare(1), Some("extra"));
        assert_eq!(attrs.bare(2), Some("last"));
        assert_eq!(parse_value(&attrs.to_string()), attrs);
    }

    #[test]
    fn semicolon_is_not_quoted() {
        let mut attrs = HeaderAttributes::default();
        attrs.insert("filename", "a;b.txt");
        assert_eq!(attrs.to_string(), "filename=a;b.txt");
    }

    #[test]
    fn trim_blank_matches_form_whitespace() {
        assert_eq!(trim_blank(b" \t\r\n\0\x0Bvalue\0\x0B\n "), b"value");
        assert_eq!(trim_blank(b"\x0Ckeep\x0C"), b"\x0Ckeep\x0C");
        assert_eq!(trim_blank(b" \0 "), b"");
        assert_eq!(trim_blank(b""), b"");
    }

    #[test]
    fn parse_headers_lf_and_crlf() {
        let expected = HeaderMap::from_pairs([
            ("foo", "bar"),
            ("baz", r#"qux; quux="corge grault""#),
            ("baz", "garply"),
        ]);
        let lf = "Foo: bar\nBaz: qux; quux=\"corge grault\"\nBaz: garply\n";
        assert_eq!(parse_headers(lf), expected);
        let crlf = "Foo: bar\r\nBaz: qux; quux=\"corge grault\"\r\nBaz: garply\r\n";
        assert_eq!(parse_headers(crlf), expected);
    }

    #[test]
    fn parse_headers_drops_lines_without_colon() {
        let headers = parse_headers("Content-Disposition form-data; name=\"bar\"\nX-Ok: 1");
        assert!(!headers.has("content-disposition"));
        assert_eq!(headers.get("x-ok"), ["1"]);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn header_value_keeps_later_colons() {
        let headers = parse_headers("Location: http://example.com:8080/");
        assert_eq!(headers.get_line("LOCATION"), "http://example.com:8080/");
    }

    #[test]
    fn header_map_accessors() {
        let headers = HeaderMap::from_pairs([("Foo", "bar"), (" foo ", "baz")]);
        assert_eq!(headers.get("FOO"), ["bar", "baz"]);
        assert_eq!(headers.get_line("foo"), "bar, baz");
        assert_eq!(headers.get_line("missing"), "");
        assert!(headers.get("missing").is_empty());
        assert!(headers.has("Foo"));
        assert!(!headers.has("bar"));
    }

    #[test]
    fn header_map_values_merge() {
        let headers = HeaderMap::from_pairs([
            ("content-type", "text/plain; charset=ascii"),
            ("content-type", "text/html; charset=utf-8"),
        ]);
        let values = headers.values("Content-Type");
        assert_eq!(values.bare(0), Some("text/plain"));
        assert_eq!(values.bare(1), Some("text/html"));
        assert_eq!(values.get("charset"), Some("utf-8"));
        assert_eq!(headers.get_value("content-type", 0_i64).as_deref(), Some("text/plain"));
        assert!(headers.has_value("content-type", "charset"));
        assert!(!headers.has_value("content-type", "boundary"));
        assert_eq!(headers.get_value_or("content-type", "boundary", "none"), "none");
    }

    #[test]
    fn header_map_pure_updates() {
        let base = HeaderMap::from_pairs([("a", "1"), ("b", "2")]);
        let replaced = base.with("A", ["x", "y"]);
        let added = base.with_added("b", ["3"]);
        let removed = base.without("B");
        assert_eq!(base.get("a"), ["1"]);
        assert_eq!(replaced.get("a"), ["x", "y"]);
        assert_eq!(added.get("b"), ["2", "3"]);
        assert!(!removed.has("b"));
        assert!(base.has("b"));
    }

    #[test]
    fn split_lf() {
        let text = b"Foo: bar\nBaz: qux; quux=\"corge grault\"\n\nGarply: the body!\n";
        let (head, body) = split_from_body(text);
        assert_eq!(head, "Foo: bar\nBaz: qux; quux=\"corge grault\"");
        assert_eq!(body, b"Garply: the body!\n");
    }

    #[test]
    fn split_crlf() {
        let text = b"Foo: bar\r\nBaz: qux; quux=\"corge grault\"\r\n\r\nGarply: the body!\r\n";
        let (head, body) = split_from_body(text);
        assert_eq!(head, "Foo: bar\nBaz: qux; quux=\"corge grault\"");
        assert_eq!(body, b"Garply: the body!\r\n");
    }

    #[test]
    fn split_cr() {
        let text = b"Foo: bar\rBaz: qux; quux=\"corge grault\"\r\rGarply: the body!\r";
        let (head, body) = split_from_body(text);
        assert_eq!(head, "Foo: bar\nBaz: qux; quux=\"corge grault\"");
        assert_eq!(body, b"Garply: the body!\r");
    }

    #[test]
    fn split_without_blank_line() {
        let text = b"Foo: bar\nBaz: qux; quux=\"corge grault\"\n";
        let (head, body) = split_from_body(text);
        assert_eq!(head, "Foo: bar\nBaz: qux; quux=\"corge grault\"");
        assert!(body.is_empty());
    }

    #[test]
    fn split_keeps_later_blank_lines_in_body() {
        let (head, body) = split_from_body(b"\r\nA: 1\r\n\r\nline\r\n\r\nmore");
        assert_eq!(head, "A: 1");
        assert_eq!(body, b"line\r\n\r\nmore");
    }

    #[test]
    fn split_picks_earliest_marker() {
        // "\r\n\n": the CRLF marker fails at 0, "\n\n" matches at 1.
        let (head, body) = split_from_body(b"A: 1\r\n\nbody");
        assert_eq!(head, "A: 1");
        assert_eq!(body, b"body");
    }

    #[test]
    fn split_and_parse() {
        let text = b"Foo: bar\nBaz: qux; quux=\"corge grault\"\n\nGarply: the body!\n";
        let (headers, body) = split_from_body_and_parse(text);
        assert_eq!(
            headers,
            HeaderMap::from_pairs([("foo", "bar"), ("baz", r#"qux; quux="corge grault""#)])
        );
        assert_eq!(body, b"Garply: the body!\n");
    }
}
