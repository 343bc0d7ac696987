//! Case-insensitive header container shared by requests and responses.
//!
//! Header names are normalized on every access: surrounding whitespace is
//! trimmed, the name is lower-cased and hyphens are folded to underscores, so
//! `Content-Type`, `content-type` and `CONTENT_TYPE` all address the same
//! entry. Entries keep their insertion order, which is the order used when
//! serializing back to the wire.
//!
//! # Wire form
//!
//! Serialization title-cases each underscore separated segment and joins the
//! segments with `-`:
//!
//! ```
//! use micro_http_pool::protocol::HeaderStore;
//!
//! let mut headers = HeaderStore::new();
//! headers.set("content-type", "text/html");
//! assert_eq!(headers.serialize(), "Content-Type: text/html\r\n");
//! ```

use std::fmt;

use crate::protocol::ParseError;

/// Ordered, case-insensitive mapping from header name to a single value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderStore {
    entries: Vec<(String, String)>,
}

impl HeaderStore {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Parses a raw header block into a fresh store.
    ///
    /// See [`HeaderStore::parse_block`] for the accepted line shapes.
    pub fn from_block(text: &str) -> Result<Self, ParseError> {
        let mut headers = Self::new();
        headers.parse_block(text)?;
        Ok(headers)
    }

    /// Sets `name` to `value`, replacing any previous value.
    pub fn set<N: AsRef<str>, V: Into<String>>(&mut self, name: N, value: V) -> &mut Self {
        self.set_with(name, value, true)
    }

    /// Sets `name` to `value`.
    ///
    /// With `replace == false` an existing entry is left untouched; a missing
    /// one is still inserted.
    pub fn set_with<N: AsRef<str>, V: Into<String>>(&mut self, name: N, value: V, replace: bool) -> &mut Self {
        let name = normalize(name.as_ref());
        match self.position(&name) {
            Some(_) if !replace => {}
            Some(index) => self.entries[index].1 = value.into(),
            None => self.entries.push((name, value.into())),
        }
        self
    }

    pub fn get<N: AsRef<str>>(&self, name: N) -> Option<&str> {
        let name = normalize(name.as_ref());
        self.position(&name).map(|index| self.entries[index].1.as_str())
    }

    pub fn has<N: AsRef<str>>(&self, name: N) -> bool {
        self.position(&normalize(name.as_ref())).is_some()
    }

    /// Returns true when `name` is present and its value equals `value` exactly.
    pub fn contains<N: AsRef<str>>(&self, name: N, value: &str) -> bool {
        self.get(name).is_some_and(|current| current == value)
    }

    /// Removes `name`, returning its previous value.
    pub fn remove<N: AsRef<str>>(&mut self, name: N) -> Option<String> {
        let name = normalize(name.as_ref());
        self.position(&name).map(|index| self.entries.remove(index).1)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Normalized names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// `(normalized name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// The first entry whose name or value would break the wire framing:
    /// any CR, LF or NUL byte.
    pub fn first_unsendable(&self) -> Option<(&str, &str)> {
        let breaks_framing = |s: &str| s.bytes().any(|b| matches!(b, b'\r' | b'\n' | 0));
        self.iter().find(|(name, value)| breaks_framing(name) || breaks_framing(value))
    }

    /// Renders every entry as `Name-With-Hyphens: value\r\n`.
    ///
    /// An empty store serializes to an empty string.
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(self.entries.iter().map(|(n, v)| n.len() + v.len() + 4).sum());
        for (name, value) in &self.entries {
            push_wire_name(&mut out, name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out
    }

    /// Parses a raw header block and `set`s every entry it contains.
    ///
    /// Lines may be terminated by `\r\n`, `\n` or `\r`. A `token: value` line
    /// starts a new entry, a line starting with a space or tab continues the
    /// previous entry (obsolete line folding) and a blank line ends the block.
    /// Anything else is rejected with [`ParseError::MalformedHeader`].
    pub fn parse_block(&mut self, text: &str) -> Result<(), ParseError> {
        let mut pending: Option<(String, String)> = None;

        for line in split_lines(text) {
            if line.is_empty() {
                break;
            }

            if line.starts_with([' ', '\t']) {
                let Some((_, value)) = pending.as_mut() else {
                    return Err(ParseError::malformed_header(line));
                };
                let folded = line.trim();
                if !folded.is_empty() {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(folded);
                }
                continue;
            }

            let Some((name, value)) = split_header_line(line) else {
                return Err(ParseError::malformed_header(line));
            };

            if let Some((name, value)) = pending.replace((name.to_ascii_lowercase(), value.trim().to_string())) {
                self.set(name, value);
            }
        }

        if let Some((name, value)) = pending {
            self.set(name, value);
        }
        Ok(())
    }

    fn position(&self, normalized: &str) -> Option<usize> {
        self.entries.iter().position(|(name, _)| name == normalized)
    }
}

impl fmt::Display for HeaderStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl<N: AsRef<str>, V: Into<String>> FromIterator<(N, V)> for HeaderStore {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut headers = Self::new();
        headers.extend(iter);
        headers
    }
}

impl<N: AsRef<str>, V: Into<String>> Extend<(N, V)> for HeaderStore {
    fn extend<T: IntoIterator<Item = (N, V)>>(&mut self, iter: T) {
        for (name, value) in iter {
            self.set(name, value);
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('-', "_")
}

fn push_wire_name(out: &mut String, normalized: &str) {
    for (i, segment) in normalized.split('_').enumerate() {
        if i > 0 {
            out.push('-');
        }
        let mut chars = segment.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.push_str(chars.as_str());
        }
    }
}

/// Splits `token: rest` on the first colon, requiring a non-empty RFC 7230 token.
fn split_header_line(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    let valid = !name.is_empty() && name.bytes().all(is_token_byte);
    valid.then_some((name, value))
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Iterates lines separated by `\r\n`, `\n` or a lone `\r`.
fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = Some(text);
    std::iter::from_fn(move || {
        let current = rest?;
        match current.find(['\r', '\n']) {
            Some(index) => {
                let skip = if current[index..].starts_with("\r\n") { 2 } else { 1 };
                rest = Some(&current[index + skip..]);
                Some(&current[..index])
            }
            None => {
                rest = None;
                Some(current)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn names_are_case_and_hyphen_insensitive() {
        let mut headers = HeaderStore::new();
        headers.set("Content-Type", "text/html");

        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("Content-Type"), Some("text/html"));
        assert_eq!(headers.get(" CONTENT_TYPE "), Some("text/html"));
        assert!(headers.has("content_type"));
        assert!(headers.contains("CONTENT-TYPE", "text/html"));
        assert!(!headers.contains("content-type", "text/plain"));
        assert_eq!(headers.serialize(), "Content-Type: text/html\r\n");
    }

    #[test]
    fn set_without_replace_keeps_existing_value() {
        let mut headers = HeaderStore::new();
        headers.set("Accept", "text/html");
        headers.set_with("accept", "*/*", false);
        headers.set_with("User-Agent", "micro", false);

        assert_eq!(headers.get("accept"), Some("text/html"));
        assert_eq!(headers.get("user-agent"), Some("micro"));
        assert_eq!(headers.count(), 2);

        headers.set("ACCEPT", "*/*");
        assert_eq!(headers.get("accept"), Some("*/*"));
        assert_eq!(headers.count(), 2);
    }

    #[test]
    fn remove_and_count() {
        let mut headers: HeaderStore = [("Host", "example.com"), ("Connection", "close")].into_iter().collect();
        assert_eq!(headers.count(), 2);
        assert_eq!(headers.remove("host"), Some("example.com".to_string()));
        assert_eq!(headers.remove("host"), None);
        assert_eq!(headers.count(), 1);
        assert!(!headers.is_empty());
    }

    #[test]
    fn serialize_keeps_insertion_order() {
        let mut headers = HeaderStore::new();
        assert_eq!(headers.serialize(), "");

        headers.set("x-request-id", "42").set("host", "example.com").set("accept_encoding", "gzip");

        assert_eq!(headers.serialize(), "X-Request-Id: 42\r\nHost: example.com\r\nAccept-Encoding: gzip\r\n");
        assert_eq!(headers.keys().collect::<Vec<_>>(), vec!["x_request_id", "host", "accept_encoding"]);
    }

    #[test]
    fn parse_block_with_mixed_terminators() {
        let headers = HeaderStore::from_block("Content-Type: text/plain\r\nContent-Length:  5 \nServer: test\rX-Empty:").unwrap();

        assert_eq!(headers.count(), 4);
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("content-length"), Some("5"));
        assert_eq!(headers.get("server"), Some("test"));
        assert_eq!(headers.get("x-empty"), Some(""));
    }

    #[test]
    fn parse_block_folds_continuation_lines() {
        let str = indoc! {"
            X-Folded: first
              second
            \tthird
            Accept: */*
        "};

        let headers = HeaderStore::from_block(str).unwrap();
        assert_eq!(headers.get("x-folded"), Some("first second third"));
        assert_eq!(headers.get("accept"), Some("*/*"));
    }

    #[test]
    fn parse_block_stops_at_blank_line() {
        let headers = HeaderStore::from_block("A: 1\r\n\r\nthis is not a header").unwrap();
        assert_eq!(headers.count(), 1);
        assert_eq!(headers.get("a"), Some("1"));
    }

    #[test]
    fn parse_block_splits_on_first_colon() {
        let headers = HeaderStore::from_block("Location: http://example.com:8080/path").unwrap();
        assert_eq!(headers.get("location"), Some("http://example.com:8080/path"));
    }

    #[test]
    fn parse_block_rejects_malformed_lines() {
        let err = HeaderStore::from_block("Valid: yes\r\nnot a header line").unwrap_err();
        assert!(matches!(err, ParseError::MalformedHeader { ref line } if line == "not a header line"));

        let err = HeaderStore::from_block(" leading continuation").unwrap_err();
        assert!(matches!(err, ParseError::MalformedHeader { .. }));

        let err = HeaderStore::from_block("Bad Name: value").unwrap_err();
        assert!(matches!(err, ParseError::MalformedHeader { .. }));
    }

    #[test]
    fn later_duplicate_replaces_earlier() {
        let headers = HeaderStore::from_block("Set-Cookie: a=1\r\nSet-Cookie: b=2").unwrap();
        assert_eq!(headers.count(), 1);
        assert_eq!(headers.get("set-cookie"), Some("b=2"));
    }

    #[test]
    fn line_breaks_make_an_entry_unsendable() {
        let mut headers = HeaderStore::new();
        headers.set("Accept", "*/*").set("X-Tab", "a\tb");
        assert_eq!(headers.first_unsendable(), None);

        headers.set("X-Split", "a\r\nX-Injected: 1");
        assert_eq!(headers.first_unsendable(), Some(("x_split", "a\r\nX-Injected: 1")));
    }
}
