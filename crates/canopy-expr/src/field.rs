//! Field paths.
//!
//! A path is a sequence of segments separated by `.`: plain keys, bracketed
//! keys (`tags['env']`), array wildcards (`logs[*]`), and numeric indexes.
//! Bracketed keys are data lookups and keep their case and spelling exactly;
//! they are never interpreted as policy-language keywords.

use std::{fmt, str::FromStr};

use canopy_contracts::error::{CanopyError, CanopyResult};

/// Aliases whose property path does not follow the `properties.<tail>` rule.
const IRREGULAR_ALIASES: &[(&str, &str)] = &[
    ("Microsoft.Compute/imagePublisher", "properties.storageProfile.imageReference.publisher"),
    ("Microsoft.Compute/imageOffer", "properties.storageProfile.imageReference.offer"),
    ("Microsoft.Compute/imageSku", "properties.storageProfile.imageReference.sku"),
    ("Microsoft.Compute/imageVersion", "properties.storageProfile.imageReference.version"),
    ("Microsoft.Compute/licenseType", "properties.licenseType"),
];

/// Top-level fields that describe where a resource sits rather than how it is
/// configured.
const APPLICABILITY_FIELDS: &[&str] = &["type", "location", "name", "tags"];

/// One segment of a field path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A plain dotted key.
    Key(String),
    /// A bracketed key, `['key']`.
    Quoted(String),
    /// `[*]`: every element of an array.
    Wildcard,
    /// `[n]`: a single array element.
    Index(usize),
}

/// A parsed field path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Build a path from segments.
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// The current array element itself, written `.`.
    pub fn element() -> Self {
        Self { segments: Vec::new() }
    }

    pub fn is_element(&self) -> bool {
        self.segments.is_empty()
    }

    /// Parse a plain field path such as `properties.logs[*].enabled`.
    pub fn parse(path: &str) -> CanopyResult<Self> {
        let invalid = |reason: &str| CanopyError::InvalidFieldPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        if path.trim().is_empty() {
            return Err(invalid("path is empty"));
        }
        if path == "." {
            return Ok(Self::element());
        }

        let mut segments = Vec::new();
        let mut key = String::new();
        let mut chars = path.chars().peekable();
        // True right after a '.', where a key must follow.
        let mut expect_key = true;

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if key.is_empty() && expect_key {
                        return Err(invalid("empty segment"));
                    }
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    }
                    expect_key = true;
                }
                '[' => {
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    } else if expect_key && !segments.is_empty() {
                        return Err(invalid("bracket must follow a key"));
                    }
                    segments.push(read_bracket(&mut chars).map_err(|r| invalid(&r))?);
                    expect_key = false;
                    match chars.peek() {
                        None | Some('.') | Some('[') => {}
                        Some(_) => return Err(invalid("expected '.' or '[' after ']'")),
                    }
                }
                ']' => return Err(invalid("unbalanced ']'")),
                other => {
                    key.push(other);
                    expect_key = false;
                }
            }
        }

        if !key.is_empty() {
            segments.push(Segment::Key(key));
        } else if expect_key {
            return Err(invalid("path ends with '.'"));
        }

        Ok(Self { segments })
    }

    /// Parse a field as written in a policy rule, mapping provider aliases
    /// (`Microsoft.Storage/storageAccounts/networkAcls.defaultAction`) to
    /// resource property paths (`properties.networkAcls.defaultAction`).
    pub fn from_policy_field(field: &str) -> CanopyResult<Self> {
        if let Some((_, path)) = IRREGULAR_ALIASES
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(field))
        {
            return Self::parse(path);
        }

        match last_slash_outside_brackets(field) {
            Some(at) => {
                let tail = &field[at + 1..];
                if tail.is_empty() {
                    return Err(CanopyError::InvalidFieldPath {
                        path: field.to_string(),
                        reason: "alias has no property path".to_string(),
                    });
                }
                Self::parse(&format!("properties.{tail}"))
            }
            None => Self::parse(field),
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True if the path is exactly the single key `name` (case-insensitive).
    pub fn is_key(&self, name: &str) -> bool {
        matches!(self.segments.as_slice(), [Segment::Key(k)] if k.eq_ignore_ascii_case(name))
    }

    /// True for the resource `type` field.
    pub fn is_type(&self) -> bool {
        self.is_key("type")
    }

    /// True for fields that only decide whether a rule applies: `type`,
    /// `location`, `name`, and anything under `tags`.
    pub fn is_applicability(&self) -> bool {
        match self.segments.first() {
            Some(Segment::Key(first)) => {
                let is_tags = first.eq_ignore_ascii_case("tags");
                let top = APPLICABILITY_FIELDS.iter().any(|f| f.eq_ignore_ascii_case(first));
                top && (self.segments.len() == 1 || is_tags)
            }
            _ => false,
        }
    }

    /// True if the last segment is `[*]`.
    pub fn ends_with_wildcard(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Wildcard))
    }

    /// The path without a trailing `[*]`.
    pub fn without_trailing_wildcard(&self) -> FieldPath {
        let mut segments = self.segments.clone();
        if matches!(segments.last(), Some(Segment::Wildcard)) {
            segments.pop();
        }
        FieldPath { segments }
    }

    /// The remainder of this path below `prefix`, if it starts with it. A
    /// path equal to `prefix` is the [`element`](Self::element) itself.
    ///
    /// Keys compare case-insensitively; bracketed keys compare exactly.
    pub fn strip_prefix(&self, prefix: &FieldPath) -> Option<FieldPath> {
        if prefix.segments.len() > self.segments.len() {
            return None;
        }
        let matches = self
            .segments
            .iter()
            .zip(&prefix.segments)
            .all(|(a, b)| match (a, b) {
                (Segment::Key(a), Segment::Key(b)) => a.eq_ignore_ascii_case(b),
                (a, b) => a == b,
            });
        matches.then(|| FieldPath {
            segments: self.segments[prefix.segments.len()..].to_vec(),
        })
    }
}

fn read_bracket(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<Segment, String> {
    if chars.peek() == Some(&'\'') {
        chars.next();
        let mut text = String::new();
        loop {
            match chars.next() {
                Some('\'') if chars.peek() == Some(&'\'') => {
                    chars.next();
                    text.push('\'');
                }
                Some('\'') => break,
                Some(c) => text.push(c),
                None => return Err("unterminated quoted key".to_string()),
            }
        }
        return match chars.next() {
            Some(']') => Ok(Segment::Quoted(text)),
            _ => Err("expected ']' after quoted key".to_string()),
        };
    }

    let mut text = String::new();
    loop {
        match chars.next() {
            Some(']') => break,
            Some(c) => text.push(c),
            None => return Err("unbalanced '['".to_string()),
        }
    }
    let text = text.trim();
    if text.is_empty() {
        Err("empty brackets".to_string())
    } else if text == "*" {
        Ok(Segment::Wildcard)
    } else if let Ok(n) = text.parse::<usize>() {
        Ok(Segment::Index(n))
    } else {
        Ok(Segment::Quoted(text.to_string()))
    }
}

fn last_slash_outside_brackets(field: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut last = None;
    for (i, c) in field.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => last = Some(i),
            _ => {}
        }
    }
    last
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_element() {
            return f.write_str(".");
        }
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(k) if i == 0 => f.write_str(k)?,
                Segment::Key(k) => write!(f, ".{k}")?,
                Segment::Quoted(k) => write!(f, "['{}']", k.replace('\'', "''"))?,
                Segment::Wildcard => f.write_str("[*]")?,
                Segment::Index(n) => write!(f, "[{n}]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = CanopyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_segment_kinds() {
        let path = FieldPath::parse("properties.logs[*].retentionPolicy.days").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("properties".into()),
                Segment::Key("logs".into()),
                Segment::Wildcard,
                Segment::Key("retentionPolicy".into()),
                Segment::Key("days".into()),
            ]
        );
        assert_eq!(path.to_string(), "properties.logs[*].retentionPolicy.days");
    }

    #[test]
    fn bracketed_keys_are_preserved_and_normalized() {
        let quoted = FieldPath::parse("tags['Cost.Center']").unwrap();
        assert_eq!(
            quoted.segments(),
            &[Segment::Key("tags".into()), Segment::Quoted("Cost.Center".into())]
        );

        let bare = FieldPath::parse("tags[env]").unwrap();
        assert_eq!(bare.to_string(), "tags['env']");

        let indexed = FieldPath::parse("properties.ipRules[0].value").unwrap();
        assert_eq!(indexed.segments()[2], Segment::Index(0));
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["", "a..b", ".a", "a.", "tags['env'", "a]b", "logs[*]x", "a[]"] {
            assert!(FieldPath::parse(bad).is_err(), "expected '{bad}' to be rejected");
        }
    }

    #[test]
    fn maps_aliases_to_property_paths() {
        let path =
            FieldPath::from_policy_field("Microsoft.Storage/storageAccounts/networkAcls.defaultAction").unwrap();
        assert_eq!(path.to_string(), "properties.networkAcls.defaultAction");

        let path = FieldPath::from_policy_field("Microsoft.Compute/imagePublisher").unwrap();
        assert_eq!(path.to_string(), "properties.storageProfile.imageReference.publisher");

        let path = FieldPath::from_policy_field("Microsoft.Insights/diagnosticSettings/logs[*].enabled").unwrap();
        assert_eq!(path.to_string(), "properties.logs[*].enabled");

        // A slash inside brackets is part of a key, not an alias separator.
        let path = FieldPath::from_policy_field("tags['cost/center']").unwrap();
        assert_eq!(path.to_string(), "tags['cost/center']");
    }

    #[test]
    fn classifies_type_and_applicability_fields() {
        assert!(FieldPath::parse("type").unwrap().is_type());
        assert!(FieldPath::parse("Type").unwrap().is_type());
        assert!(!FieldPath::parse("properties.type").unwrap().is_type());

        assert!(FieldPath::parse("location").unwrap().is_applicability());
        assert!(FieldPath::parse("tags.Environment").unwrap().is_applicability());
        assert!(FieldPath::parse("tags['env']").unwrap().is_applicability());
        assert!(!FieldPath::parse("name.first").unwrap().is_applicability());
        assert!(!FieldPath::parse("kind").unwrap().is_applicability());
    }

    #[test]
    fn strips_array_prefix() {
        let prefix = FieldPath::parse("properties.logs[*]").unwrap();
        let inner = FieldPath::parse("Properties.logs[*].retentionPolicy.enabled").unwrap();
        assert_eq!(inner.strip_prefix(&prefix).unwrap().to_string(), "retentionPolicy.enabled");

        let other = FieldPath::parse("properties.metrics[*].enabled").unwrap();
        assert!(other.strip_prefix(&prefix).is_none());
        let itself = FieldPath::parse("Properties.logs[*]").unwrap().strip_prefix(&prefix).unwrap();
        assert!(itself.is_element());
        assert_eq!(itself.to_string(), ".");
        assert_eq!(FieldPath::parse(".").unwrap(), itself);
        assert!(FieldPath::parse("properties.logs").unwrap().strip_prefix(&prefix).is_none());

        assert!(prefix.ends_with_wildcard());
        assert_eq!(prefix.without_trailing_wildcard().to_string(), "properties.logs");
    }
}
