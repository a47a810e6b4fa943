// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Name cleanup used when the sink rejects a value.

/// Characters every sink name may contain, apart from ASCII alphanumerics.
const ALLOWED_PUNCTUATION: &[char] = &[' ', '.', '_', '(', ')', '-'];

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || ALLOWED_PUNCTUATION.contains(&c)
}

/// Replace disallowed characters with `-`, collapse runs of `-` and trim.
///
/// Returns `None` when nothing usable remains.
pub fn sanitize_name(name: &str) -> Option<String> {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let c = if is_allowed(c) { c } else { '-' };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    let trimmed = out.trim_matches(|c: char| c == '-' || c.is_whitespace());
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Whether `name` would change under [`sanitize_name`].
pub fn needs_sanitizing(name: &str) -> bool {
    sanitize_name(name).as_deref() != Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_names_pass_through() {
        assert_eq!(sanitize_name("web-01").as_deref(), Some("web-01"));
        assert_eq!(sanitize_name("db 02 (old)").as_deref(), Some("db 02 (old)"));
        assert!(!needs_sanitizing("app_1.example"));
    }

    #[test]
    fn test_illegal_characters_replaced() {
        assert_eq!(sanitize_name("web/01:prod").as_deref(), Some("web-01-prod"));
        assert_eq!(sanitize_name("über#$%box").as_deref(), Some("ber-box"));
        assert_eq!(sanitize_name("  ##app## ").as_deref(), Some("app"));
        assert!(needs_sanitizing("a|b"));
    }

    #[test]
    fn test_nothing_left() {
        assert_eq!(sanitize_name("///"), None);
        assert_eq!(sanitize_name(""), None);
    }
}
