//! Server-side row key regexp synthesized from tag constraints and group-by dimensions.
//!
//! With 3-byte ids and two tags `{0 0 1 0 0 2}` and `{4 5 6 9 8 7}`, the wire pattern reads
//! `(?s)^.{7}(?:.{6})*\Q\0\0\x01\0\0\x02\E(?:.{6})*\Q\x04\x05\x06\t\x08\x07\E(?:.{6})*$`.

use crate::error::{hex, ScanError};
use crate::types::{IdWidths, TagPair, TIMESTAMP_BYTES};
use regex::bytes::{Regex, RegexBuilder};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Charset the wire pattern is expressed in: one char per byte.
pub const KEY_PATTERN_CHARSET: &str = "ISO-8859-1";

/// Allowed value ids per group-by tag name id.
pub type GroupByValues = BTreeMap<Vec<u8>, Vec<Vec<u8>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Exactly `n` bytes of anything (metric id + timestamp).
    Skip(usize),
    /// Any whole number of tag pairs of the given width.
    SkipPairs(usize),
    Literal(Vec<u8>),
    /// Exactly `n` bytes of anything (an unconstrained tag value).
    AnyValue(usize),
    /// One of several literal value ids.
    OneOf(Vec<Vec<u8>>),
}

/// A regexp over full row keys, anchored at both ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    segments: Vec<Segment>,
}

/// Next item of the merge walk over tags and group-bys.
enum Next<'a> {
    Tag(&'a TagPair),
    GroupBy(&'a [u8]),
}

impl KeyPattern {
    /// Builds the pattern for the given constraints.
    ///
    /// `tags` are fixed `(name, value)` constraints, `group_bys` are tag name ids that must be
    /// present with any value, or with one of the values listed in `group_by_values`.
    pub fn build(
        widths: &IdWidths,
        tags: &[TagPair],
        group_bys: &[Vec<u8>],
        group_by_values: &GroupByValues,
    ) -> Result<Self, ScanError> {
        validate(widths, tags, group_bys, group_by_values)?;

        let mut tags: Vec<&TagPair> = tags.iter().collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        let mut group_bys: Vec<&[u8]> = group_bys.iter().map(Vec::as_slice).collect();
        group_bys.sort();
        check_unique(tags.iter().map(|t| t.name.as_slice()), "tags")?;
        check_unique(group_bys.iter().copied(), "group_bys")?;

        let tag_size = widths.tag_pair();
        let mut segments = Vec::with_capacity(2 + 2 * (tags.len() + group_bys.len()) * 2);
        segments.push(Segment::Skip(widths.metric + TIMESTAMP_BYTES));

        let (mut ti, mut gi) = (0, 0);
        loop {
            let next = match (tags.get(ti), group_bys.get(gi)) {
                (None, None) => break,
                (Some(&tag), None) => Next::Tag(tag),
                (None, Some(&name)) => Next::GroupBy(name),
                (Some(&tag), Some(&name)) => match tag.name.as_slice().cmp(name) {
                    Ordering::Less => Next::Tag(tag),
                    Ordering::Greater => Next::GroupBy(name),
                    Ordering::Equal => {
                        return Err(ScanError::InvariantViolation(format!(
                            "tag id {} is both in 'tags' and 'group_bys'",
                            hex(name)
                        )))
                    }
                },
            };

            segments.push(Segment::SkipPairs(tag_size));
            match next {
                Next::Tag(tag) => {
                    segments.push(Segment::Literal(tag.to_bytes()));
                    ti += 1;
                }
                Next::GroupBy(name) => {
                    segments.push(Segment::Literal(name.to_vec()));
                    match group_by_values.get(name) {
                        None => segments.push(Segment::AnyValue(widths.tag_value)),
                        Some(values) => segments.push(Segment::OneOf(values.clone())),
                    }
                    gi += 1;
                }
            }
        }
        segments.push(Segment::SkipPairs(tag_size));

        Ok(Self { segments })
    }

    /// Renders the pattern for the store's regexp engine.
    ///
    /// Literal ids are wrapped in `\Q...\E`; bytes map 1:1 to chars of [`KEY_PATTERN_CHARSET`].
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(b"(?s)^");
        for segment in &self.segments {
            match segment {
                Segment::Skip(n) | Segment::AnyValue(n) => {
                    buf.extend_from_slice(format!(".{{{}}}", n).as_bytes());
                }
                Segment::SkipPairs(n) => {
                    buf.extend_from_slice(format!("(?:.{{{}}})*", n).as_bytes());
                }
                Segment::Literal(bytes) => quote_literal(&mut buf, bytes),
                Segment::OneOf(values) => {
                    buf.extend_from_slice(b"(?:");
                    for (i, value) in values.iter().enumerate() {
                        if i > 0 {
                            buf.push(b'|');
                        }
                        quote_literal(&mut buf, value);
                    }
                    buf.push(b')');
                }
            }
        }
        buf.push(b'$');
        buf
    }

    /// Charset of [`KeyPattern::to_wire`].
    pub fn charset(&self) -> &'static str {
        KEY_PATTERN_CHARSET
    }

    /// Compiles an equivalent byte regexp for local evaluation.
    pub fn to_regex(&self) -> Result<Regex, ScanError> {
        let mut src = String::from("^");
        for segment in &self.segments {
            match segment {
                Segment::Skip(n) | Segment::AnyValue(n) => src.push_str(&format!(".{{{}}}", n)),
                Segment::SkipPairs(n) => src.push_str(&format!("(?:.{{{}}})*", n)),
                Segment::Literal(bytes) => push_hex_literal(&mut src, bytes),
                Segment::OneOf(values) => {
                    src.push_str("(?:");
                    for (i, value) in values.iter().enumerate() {
                        if i > 0 {
                            src.push('|');
                        }
                        push_hex_literal(&mut src, value);
                    }
                    src.push(')');
                }
            }
        }
        src.push('$');
        RegexBuilder::new(&src)
            .unicode(false)
            .dot_matches_new_line(true)
            .build()
            .map_err(|e| ScanError::InvalidQuery(format!("key pattern does not compile: {}", e)))
    }

    /// Whether `key` matches this pattern.
    pub fn matches(&self, key: &[u8]) -> Result<bool, ScanError> {
        Ok(self.to_regex()?.is_match(key))
    }
}

/// Appends `\Q<id>\E`.
///
/// A `\` followed by `E` inside the id terminates the quote early, so after such a pair a
/// literal `\E` is emitted and quoting re-opened.
pub(crate) fn quote_literal(buf: &mut Vec<u8>, id: &[u8]) {
    buf.extend_from_slice(b"\\Q");
    let mut backslash = false;
    for &b in id {
        buf.push(b);
        if b == b'E' && backslash {
            buf.extend_from_slice(b"\\\\E\\Q");
            backslash = false;
        } else {
            backslash = b == b'\\';
        }
    }
    buf.extend_from_slice(b"\\E");
}

fn push_hex_literal(src: &mut String, bytes: &[u8]) {
    for b in bytes {
        src.push_str(&format!("\\x{:02X}", b));
    }
}

fn validate(
    widths: &IdWidths,
    tags: &[TagPair],
    group_bys: &[Vec<u8>],
    group_by_values: &GroupByValues,
) -> Result<(), ScanError> {
    for tag in tags {
        if tag.name.len() != widths.tag_name || tag.value.len() != widths.tag_value {
            return Err(ScanError::InvalidQuery(format!(
                "tag {}={} does not match id widths {}/{}",
                hex(&tag.name),
                hex(&tag.value),
                widths.tag_name,
                widths.tag_value
            )));
        }
    }
    for name in group_bys {
        if name.len() != widths.tag_name {
            return Err(ScanError::InvalidQuery(format!(
                "group-by name id {} is not {} bytes",
                hex(name),
                widths.tag_name
            )));
        }
        if let Some(values) = group_by_values.get(name) {
            if values.is_empty() {
                return Err(ScanError::InvalidQuery(format!(
                    "empty value list for group-by {}",
                    hex(name)
                )));
            }
            if let Some(bad) = values.iter().find(|v| v.len() != widths.tag_value) {
                return Err(ScanError::InvalidQuery(format!(
                    "group-by value id {} is not {} bytes",
                    hex(bad),
                    widths.tag_value
                )));
            }
        }
    }
    Ok(())
}

fn check_unique<'a>(
    sorted_names: impl Iterator<Item = &'a [u8]>,
    what: &str,
) -> Result<(), ScanError> {
    let mut prev: Option<&[u8]> = None;
    for name in sorted_names {
        if prev == Some(name) {
            return Err(ScanError::InvalidQuery(format!(
                "tag name id {} repeated in {}",
                hex(name),
                what
            )));
        }
        prev = Some(name);
    }
    Ok(())
}
