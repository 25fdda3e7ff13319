//! SQL literal construction for bulk statements.
//!
//! Values are embedded as PostgreSQL escape strings (`E'...'`). Backslash and
//! both quote characters are escaped, and their full-width forms are folded to
//! the escaped ASCII character so they cannot be normalized into a bare quote
//! further down the line. NUL is not representable in a text column and is
//! dropped.

use chrono::{DateTime, Utc};

/// Escape text for the body of an `E'...'` literal.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '\\' | '＼' => out.push_str("\\\\"),
            '\'' | '＇' => out.push_str("\\'"),
            '"' | '＂' => out.push_str("\\\""),
            '\0' => {}
            other => out.push(other),
        }
    }
    out
}

/// Quoted text literal.
pub fn text_literal(text: &str) -> String {
    format!("E'{}'", escape_text(text))
}

/// Quoted literal or `NULL`.
pub fn optional_text_literal(text: Option<&str>) -> String {
    text.map_or_else(|| "NULL".to_string(), text_literal)
}

/// `|`-joined list literal.
pub fn list_literal(items: &[String]) -> String {
    text_literal(&items.join("|"))
}

/// Timestamp literal in `YYYY-MM-DD HH:MM:SS` form, or `NULL`.
pub fn timestamp_literal(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(
        || "NULL".to_string(),
        |at| format!("'{}'", at.format("%Y-%m-%d %H:%M:%S")),
    )
}

pub fn bool_literal(value: bool) -> &'static str {
    if value { "TRUE" } else { "FALSE" }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Literal decoding used to check generated statements.

    /// Decode the body of an `E'...'` literal.
    fn unescape_text(escaped: &str) -> String {
        let mut out = String::with_capacity(escaped.len());
        let mut chars = escaped.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    /// Extract the decoded bodies of every `E'...'` literal in a statement.
    pub fn text_literals(statement: &str) -> Vec<String> {
        let mut literals = Vec::new();
        let mut chars = statement.chars().peekable();
        while let Some(c) = chars.next() {
            if c != 'E' || chars.peek() != Some(&'\'') {
                continue;
            }
            chars.next();
            let mut body = String::new();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        body.push(c);
                        if let Some(next) = chars.next() {
                            body.push(next);
                        }
                    }
                    '\'' => break,
                    other => body.push(other),
                }
            }
            literals.push(unescape_text(&body));
        }
        literals
    }
}

#[cfg(test)]
mod tests {
    use super::testing::text_literals;
    use super::*;

    #[test]
    fn test_escape_quotes_and_backslashes() {
        assert_eq!(escape_text(r#"He said "go\now""#), r#"He said \"go\\now\""#);
        assert_eq!(escape_text("it's"), r"it\'s");
    }

    #[test]
    fn test_full_width_forms_are_escaped() {
        assert_eq!(escape_text("a＼b＂c＇d"), r#"a\\b\"c\'d"#);
    }

    #[test]
    fn test_nul_is_dropped() {
        assert_eq!(escape_text("a\0b"), "ab");
    }

    #[test]
    fn test_literal_round_trip() {
        let title = r#"He said "go\now""#;
        let statement = format!("INSERT INTO t (title) VALUES ({})", text_literal(title));
        assert_eq!(text_literals(&statement), vec![title.to_string()]);
    }

    #[test]
    fn test_text_literals_skips_plain_literals() {
        let statement = format!(
            "VALUES (1, {}, '2020-01-01 00:00:00', {})",
            text_literal("x'y"),
            text_literal("")
        );
        assert_eq!(text_literals(&statement), vec!["x'y".to_string(), String::new()]);
    }

    #[test]
    fn test_null_literals() {
        assert_eq!(optional_text_literal(None), "NULL");
        assert_eq!(timestamp_literal(None), "NULL");
        assert_eq!(optional_text_literal(Some("k")), "E'k'");
    }

    #[test]
    fn test_timestamp_literal_format() {
        let at = DateTime::from_timestamp(0, 0).unwrap();
        assert_eq!(timestamp_literal(Some(at)), "'1970-01-01 00:00:00'");
    }
}
