use once_cell::sync::Lazy;
use regex::Regex;

use crate::db::error::{Error, Result};

static LINE_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"--[^\n]*").expect("line comment pattern"));
static BLOCK_DELIMITER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/\*|\*/").expect("block comment pattern"));
static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s{2,}").expect("whitespace pattern"));

/// Strips `--` and `/* */` comments, collapses whitespace runs and trims.
///
/// Block comments are first blanked out with as many spaces as they span, so
/// offsets reported while validating refer to the text the caller passed
/// (after line comments are gone). String literals get no special treatment.
pub fn normalize(raw: &str) -> Result<String> {
    if raw.trim().is_empty() {
        return Err(Error::MalformedQuery(
            "SQL query must be provided".to_string(),
        ));
    }

    let without_lines = LINE_COMMENT.replace_all(raw, "");
    let spans = block_comment_spans(&without_lines)?;

    let mut blanked = String::with_capacity(without_lines.len());
    let mut last = 0usize;
    for (start, end) in spans {
        blanked.push_str(&without_lines[last..start]);
        blanked.extend(std::iter::repeat(' ').take(end - start));
        last = end;
    }
    blanked.push_str(&without_lines[last..]);

    let clean = WHITESPACE_RUN.replace_all(&blanked, " ").trim().to_string();
    if clean.is_empty() {
        return Err(Error::MalformedQuery(
            "SQL query contains nothing but comments".to_string(),
        ));
    }
    Ok(clean)
}

fn block_comment_spans(text: &str) -> Result<Vec<(usize, usize)>> {
    let mut starts: Vec<usize> = Vec::new();
    let mut ends: Vec<usize> = Vec::new();
    for delimiter in BLOCK_DELIMITER.find_iter(text) {
        if delimiter.as_str() == "/*" {
            starts.push(delimiter.start());
        } else {
            ends.push(delimiter.end());
        }
    }

    if starts.len() != ends.len() {
        return Err(Error::MalformedQuery(format!(
            "Multiline comments open/close tags count mismatch ({} opened, {} closed)",
            starts.len(),
            ends.len()
        )));
    }

    let mut spans = Vec::with_capacity(starts.len());
    let mut previous_end = 0usize;
    for (start, end) in starts.into_iter().zip(ends) {
        if start >= end {
            return Err(Error::MalformedQuery(format!(
                "Unmatched end of multiline comment at {}",
                end - 2
            )));
        }
        if start < previous_end {
            return Err(Error::MalformedQuery(format!(
                "Nested multiline comment at {start}"
            )));
        }
        spans.push((start, end));
        previous_end = end;
    }
    Ok(spans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_line_comments() {
        let sql = "SELECT * -- everything\nFROM TEST -- the table";
        assert_eq!(normalize(sql).unwrap(), "SELECT * FROM TEST");
    }

    #[test]
    fn strips_block_comments_and_collapses_whitespace() {
        let sql = "SELECT /* columns */ *\n\n  FROM /* multi\nline */ TEST  ";
        assert_eq!(normalize(sql).unwrap(), "SELECT * FROM TEST");
    }

    #[test]
    fn single_whitespace_characters_survive() {
        assert_eq!(normalize("SELECT\n1").unwrap(), "SELECT\n1");
    }

    #[test]
    fn blank_text_is_malformed() {
        assert!(matches!(normalize("   "), Err(Error::MalformedQuery(_))));
        assert!(matches!(normalize(""), Err(Error::MalformedQuery(_))));
        assert!(matches!(
            normalize("/* only a comment */"),
            Err(Error::MalformedQuery(_))
        ));
    }

    #[test]
    fn unbalanced_block_comment_is_malformed() {
        assert!(matches!(
            normalize("SELECT /* open FROM TEST"),
            Err(Error::MalformedQuery(_))
        ));
        assert!(matches!(
            normalize("SELECT close */ FROM TEST"),
            Err(Error::MalformedQuery(_))
        ));
    }

    #[test]
    fn end_before_start_is_malformed() {
        let err = normalize("SELECT */ 1 /* FROM TEST").unwrap_err();
        match err {
            Error::MalformedQuery(message) => assert!(message.contains("Unmatched")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn nested_block_comment_is_malformed() {
        assert!(matches!(
            normalize("SELECT /* a /* b */ c */ 1"),
            Err(Error::MalformedQuery(_))
        ));
    }

    #[test]
    fn line_comment_inside_block_comment_is_removed_first() {
        let sql = "SELECT 1 /* keep -- gone */\nFROM DUAL */";
        // the line comment swallows the first terminator, leaving one pair
        assert_eq!(normalize(sql).unwrap(), "SELECT 1");
    }
}
