//! Dialect handling for engines that accept a trailing `LIMIT n`

use once_cell::sync::Lazy;
use querydesk_core::collaborators::DialectAdapter;
use regex::Regex;

// Trailing LIMIT, optionally followed by OFFSET and a statement terminator
static TRAILING_LIMIT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\blimit\s+(\d+)(\s+offset\s+\d+)?\s*;?\s*$").unwrap()
});

static LEADING_COMMENT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*(?:--[^\n]*\n\s*|/\*.*?\*/\s*)*").unwrap());

/// First keyword of a statement, lowercased, skipping leading comments
pub fn first_keyword(sql: &str) -> Option<String> {
    let body = LEADING_COMMENT_REGEX.replace(sql, "");
    body.split(|c: char| c.is_whitespace() || c == '(')
        .find(|word| !word.is_empty())
        .map(|word| word.to_ascii_lowercase())
}

/// Whether the statement only reads data
pub fn is_select(sql: &str) -> bool {
    matches!(
        first_keyword(sql).as_deref(),
        Some("select") | Some("with") | Some("explain") | Some("show") | Some("values")
    )
}

/// LIMIT handling shared by PostgreSQL, SQLite, MySQL and friends
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericDialect;

impl GenericDialect {
    pub fn new() -> Self {
        Self
    }
}

impl DialectAdapter for GenericDialect {
    fn get_limit_from_sql(&self, sql: &str) -> Option<i64> {
        TRAILING_LIMIT_REGEX
            .captures(sql)
            .and_then(|caps| caps[1].parse().ok())
    }

    fn apply_limit_to_sql(&self, sql: &str, limit: i64) -> String {
        if !matches!(first_keyword(sql).as_deref(), Some("select") | Some("with")) {
            return sql.to_string();
        }

        if let Some(caps) = TRAILING_LIMIT_REGEX.captures(sql) {
            let existing: Option<i64> = caps[1].parse().ok();
            if existing.is_some_and(|e| e <= limit) {
                return sql.to_string();
            }
            let digits = caps.get(1).map(|m| m.range()).unwrap_or_default();
            let mut limited = sql.to_string();
            limited.replace_range(digits, &limit.to_string());
            return limited;
        }

        let trimmed = sql.trim_end().trim_end_matches(';').trim_end();
        format!("{}\nLIMIT {}", trimmed, limit)
    }
}
