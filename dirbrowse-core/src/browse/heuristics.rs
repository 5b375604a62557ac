//! Display helpers for browse listings.

use regex::Regex;
use std::sync::OnceLock;

/// Object class patterns for entries that normally have no children.
///
/// Uses `OnceLock` for thread-safe lazy initialization.
pub struct LeafClassPatterns {
    leaf: Regex,
}

impl LeafClassPatterns {
    /// Gets the singleton instance of leaf class patterns.
    pub fn instance() -> &'static Self {
        static PATTERNS: OnceLock<LeafClassPatterns> = OnceLock::new();
        PATTERNS.get_or_init(|| Self {
            // Safe: hardcoded regex pattern is known to be valid
            #[allow(clippy::expect_used)]
            leaf: Regex::new(r"(?i)(person|user|computer|device|printer)")
                .expect("Invalid leaf class regex"),
        })
    }

    /// Whether an object class names a leaf-like kind.
    pub fn is_leaf_class(&self, object_class: &str) -> bool {
        self.leaf.is_match(object_class)
    }
}

/// Best-effort guess at whether an entry can be expanded.
///
/// Entries whose object classes look like people or devices are assumed to
/// be leaves; everything else is offered as expandable.
pub fn has_children(object_classes: &[String]) -> bool {
    let patterns = LeafClassPatterns::instance();
    !object_classes.iter().any(|class| patterns.is_leaf_class(class))
}

/// Value of the first RDN of a DN, with escapes resolved.
///
/// Falls back to the whole DN when it has no `attr=value` shape.
pub fn display_name(dn: &str) -> String {
    let first_rdn = split_unescaped(dn, &[',', ';', '+']);
    match first_rdn.find('=') {
        Some(position) => unescape(first_rdn[position + 1..].trim()),
        None => dn.trim().to_string(),
    }
}

/// Prefix of `value` up to the first unescaped delimiter.
fn split_unescaped<'a>(value: &'a str, delimiters: &[char]) -> &'a str {
    let mut escaped = false;
    for (index, c) in value.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if delimiters.contains(&c) {
            return &value[..index];
        }
    }
    value
}

/// Resolves `\,`-style and `\2C`-style escapes in an RDN value.
fn unescape(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\' && index + 1 < bytes.len() {
            let hex = bytes
                .get(index + 1..index + 3)
                .and_then(|pair| std::str::from_utf8(pair).ok())
                .and_then(|pair| u8::from_str_radix(pair, 16).ok());
            match hex {
                Some(byte) => {
                    out.push(byte);
                    index += 3;
                }
                None => {
                    out.push(bytes[index + 1]);
                    index += 2;
                }
            }
        } else {
            out.push(bytes[index]);
            index += 1;
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_leaf_class_patterns_singleton() {
        let p1 = LeafClassPatterns::instance();
        let p2 = LeafClassPatterns::instance();
        assert!(std::ptr::eq(p1, p2));
    }

    #[test]
    fn test_has_children_heuristic() {
        assert!(!has_children(&classes(&["top", "inetOrgPerson"])));
        assert!(!has_children(&classes(&["top", "USER"])));
        assert!(!has_children(&classes(&["computer"])));
        assert!(!has_children(&classes(&["ieee802Device"])));
        assert!(!has_children(&classes(&["printerService"])));
        assert!(has_children(&classes(&["top", "organizationalUnit"])));
        assert!(has_children(&classes(&["domain"])));
        assert!(has_children(&[]));
    }

    #[test]
    fn test_display_name_first_rdn_value() {
        assert_eq!(display_name("ou=People,dc=example,dc=com"), "People");
        assert_eq!(display_name("cn=Smith\\, John,ou=People"), "Smith, John");
        assert_eq!(display_name("cn=caf\\C3\\A9,dc=example"), "café");
        assert_eq!(display_name("uid=jdoe+cn=John Doe,dc=example"), "jdoe");
        assert_eq!(display_name("dc=example"), "example");
        assert_eq!(display_name("rootDSE"), "rootDSE");
        assert_eq!(display_name(""), "");
    }
}
