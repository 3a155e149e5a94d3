//! Text-level SQL cleanup
//!
//! Runs before parsing, so everything here works on literal marker text:
//! code fences, `/* */` and `--` comments, trailing terminators.

use lazy_static::lazy_static;
use regex::Regex;

const FENCE: &str = "```";

/// Tags accepted on the first line of a fenced block.
const LANGUAGE_TAGS: &[&str] = &["sql", "sqlite", "sqlite3", "postgres", "postgresql", "mysql"];

lazy_static! {
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").expect("block comment pattern");
}

/// Fences, block comments, line comments, terminators; repeated until the
/// text stops changing, since removing a comment can expose a fence.
pub fn sanitize(sql: &str) -> String {
    let mut current = sanitize_once(sql);
    loop {
        let next = sanitize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn sanitize_once(sql: &str) -> String {
    let sql = strip_fences(sql);
    let sql = strip_block_comments(&sql);
    let sql = strip_line_comments(&sql);
    strip_trailing_terminator(&sql).trim().to_string()
}

/// Extracts the body of a fenced code block, or trims the input.
pub fn strip_fences(sql: &str) -> String {
    let trimmed = sql.trim();
    if !trimmed.starts_with(FENCE) {
        return trimmed.to_string();
    }

    let parts: Vec<&str> = trimmed.split(FENCE).collect();
    let inner = if parts.len() >= 3 {
        drop_language_tag(parts[1])
    } else {
        trimmed.trim_matches('`')
    };
    inner.trim().to_string()
}

fn drop_language_tag(block: &str) -> &str {
    match block.split_once('\n') {
        Some((tag, rest)) if LANGUAGE_TAGS.contains(&tag.trim().to_ascii_lowercase().as_str()) => rest,
        _ => block,
    }
}

/// Removes `/* ... */` comments until none remain.
pub fn strip_block_comments(sql: &str) -> String {
    let mut current = sql.to_string();
    loop {
        let next = BLOCK_COMMENT.replace_all(&current, "").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Drops everything from `--` to the end of each line.
pub fn strip_line_comments(sql: &str) -> String {
    sql.lines()
        .map(|line| match line.find("--") {
            Some(idx) => &line[..idx],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Removes trailing `;` terminators and whitespace.
pub fn strip_trailing_terminator(sql: &str) -> &str {
    sql.trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}
