//! Validates, schema-normalizes, scope-checks, and executes LLM-generated
//! SELECT queries (C9, spec §4.9). Any validation failure yields a
//! `{"error": ...}` value without hitting the database.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sqlx::{Column, PgPool, Row};

pub const ALLOWED_TABLES: &[&str] = &[
    "Vehicles",
    "Auctions",
    "Bids",
    "AutoBids",
    "BidStrategies",
    "Users",
    "UserSavedSearches",
    "UserInteractions",
    "Watchlists",
    "AuctionAnalytics",
    "AnalyticsEvents",
    "VehicleFeatures",
];

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "drop", "delete", "alter", "insert", "update", "truncate", "exec", "--",
];

/// Server-side cap on fetched rows, applied regardless of the `LIMIT` the
/// LLM supplied (spec §4.9 step 9, §9 open question).
const MAX_ROWS: usize = 10;

static FROM_JOIN_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\b(?:from|join)\s+"?([A-Za-z_][A-Za-z0-9_]*)"?"#).unwrap());

static USER_ID_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:userid|users\.id)\s*=\s*(\d+)"#).unwrap()
});

static USER_NAME_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\busers\.name\s*=\s*'([^']*)'"#).unwrap());

static USER_EMAIL_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\busers\.email\s*=\s*'([^']*)'"#).unwrap());

static BARE_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\b").unwrap());

static SQL_KEYWORD: Lazy<std::collections::HashSet<&'static str>> = Lazy::new(|| {
    [
        "select", "from", "join", "where", "and", "or", "not", "in", "as", "on", "order", "by",
        "group", "limit", "count", "sum", "avg", "min", "max", "distinct", "asc", "desc", "is",
        "null", "like", "between", "inner", "left", "right", "outer", "having",
    ]
    .into_iter()
    .collect()
});

pub struct UserScope {
    pub id: i64,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub enum SqlValidationError {
    NotASelect,
    EmbeddedSemicolon,
    ForbiddenKeyword(String),
    TableNotAllowed(String),
    UserScopeMismatch,
}

impl SqlValidationError {
    pub fn message(&self) -> String {
        match self {
            SqlValidationError::NotASelect => "query must be a SELECT statement".to_string(),
            SqlValidationError::EmbeddedSemicolon => "query contains an embedded statement separator".to_string(),
            SqlValidationError::ForbiddenKeyword(k) => format!("query references forbidden keyword: {k}"),
            SqlValidationError::TableNotAllowed(t) => format!("table not allowed: {t}"),
            SqlValidationError::UserScopeMismatch => "query is not scoped to the authenticated user".to_string(),
        }
    }
}

pub struct SafeSqlExecutor {
    db: PgPool,
}

impl SafeSqlExecutor {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn run(
        &self,
        raw_sql: &str,
        scope: &UserScope,
    ) -> Result<Vec<HashMap<String, Value>>, SqlValidationError> {
        let normalized = Self::normalize(raw_sql);
        Self::reject_not_select(&normalized)?;
        Self::reject_embedded_semicolon(&normalized)?;
        Self::reject_forbidden_keywords(&normalized)?;
        Self::reject_disallowed_tables(&normalized)?;
        Self::enforce_user_scope(&normalized, scope)?;
        let normalized = Self::quote_identifiers(&normalized);
        let normalized = Self::ensure_row_cap(&normalized);

        match self.execute(&normalized).await {
            Ok(rows) => Ok(rows),
            Err(e) => {
                tracing::warn!(error = %e, "safe sql execution failed");
                Ok(Vec::new())
            }
        }
    }

    /// Step 1: normalize whitespace and literal newline artifacts (e.g. the
    /// LLM emitting the two characters `\` `n` instead of an actual
    /// newline).
    fn normalize(raw: &str) -> String {
        raw.replace("\\n", " ")
            .replace('\n', " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string()
    }

    fn reject_not_select(sql: &str) -> Result<(), SqlValidationError> {
        if sql.to_lowercase().starts_with("select") {
            Ok(())
        } else {
            Err(SqlValidationError::NotASelect)
        }
    }

    fn reject_embedded_semicolon(sql: &str) -> Result<(), SqlValidationError> {
        let trimmed = sql.trim_end();
        match trimmed.find(';') {
            None => Ok(()),
            Some(pos) if pos == trimmed.len() - 1 => Ok(()),
            Some(_) => Err(SqlValidationError::EmbeddedSemicolon),
        }
    }

    fn reject_forbidden_keywords(sql: &str) -> Result<(), SqlValidationError> {
        let lowered = sql.to_lowercase();
        for keyword in FORBIDDEN_KEYWORDS {
            if lowered.contains(keyword) {
                return Err(SqlValidationError::ForbiddenKeyword((*keyword).to_string()));
            }
        }
        Ok(())
    }

    fn reject_disallowed_tables(sql: &str) -> Result<(), SqlValidationError> {
        for cap in FROM_JOIN_TABLE.captures_iter(sql) {
            let table = &cap[1];
            let allowed = ALLOWED_TABLES
                .iter()
                .any(|t| t.eq_ignore_ascii_case(table));
            if !allowed {
                return Err(SqlValidationError::TableNotAllowed(table.to_string()));
            }
        }
        Ok(())
    }

    /// Step 6: every `UserId = <n>` / `Users.Id = <n>` / `Users.Name = '<s>'`
    /// / `Users.Email = '<s>'` literal must match the authenticated user.
    fn enforce_user_scope(sql: &str, scope: &UserScope) -> Result<(), SqlValidationError> {
        for cap in USER_ID_LITERAL.captures_iter(sql) {
            let literal: i64 = cap[1].parse().unwrap_or(-1);
            if literal != scope.id {
                return Err(SqlValidationError::UserScopeMismatch);
            }
        }
        for cap in USER_NAME_LITERAL.captures_iter(sql) {
            if !cap[1].eq_ignore_ascii_case(&scope.name) {
                return Err(SqlValidationError::UserScopeMismatch);
            }
        }
        for cap in USER_EMAIL_LITERAL.captures_iter(sql) {
            if !cap[1].eq_ignore_ascii_case(&scope.email) {
                return Err(SqlValidationError::UserScopeMismatch);
            }
        }
        Ok(())
    }

    /// Step 7: wrap bare table/column identifiers in double quotes,
    /// preserving the allow-list's exact case, leaving SQL keywords,
    /// already-quoted identifiers, and string literals untouched.
    fn quote_identifiers(sql: &str) -> String {
        let mut result = String::with_capacity(sql.len() + 16);
        let mut in_string = false;

        let mut cursor = 0usize;
        while cursor < sql.len() {
            let remainder = &sql[cursor..];
            if in_string {
                if let Some(end) = remainder.find('\'') {
                    result.push_str(&remainder[..=end]);
                    cursor += end + 1;
                    in_string = false;
                } else {
                    result.push_str(remainder);
                    cursor = sql.len();
                }
                continue;
            }

            if remainder.starts_with('\'') {
                result.push('\'');
                cursor += 1;
                in_string = true;
                continue;
            }

            if remainder.starts_with('"') {
                // Already quoted: copy through the closing quote untouched.
                if let Some(end) = remainder[1..].find('"') {
                    result.push_str(&remainder[..=end + 1]);
                    cursor += end + 2;
                } else {
                    result.push_str(remainder);
                    cursor = sql.len();
                }
                continue;
            }

            if let Some(m) = BARE_IDENTIFIER.find(remainder) {
                if m.start() == 0 {
                    let word = m.as_str();
                    let canonical = ALLOWED_TABLES.iter().find(|t| t.eq_ignore_ascii_case(word));
                    if let Some(canonical) = canonical {
                        result.push('"');
                        result.push_str(canonical);
                        result.push('"');
                    } else if SQL_KEYWORD.contains(word.to_lowercase().as_str())
                        || word.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false)
                    {
                        result.push_str(word);
                    } else {
                        result.push('"');
                        result.push_str(word);
                        result.push('"');
                    }
                    cursor += word.len();
                    continue;
                }
            }

            // Fall back to copying a single character when no identifier
            // starts at the cursor (punctuation, operators, whitespace).
            let ch = remainder.chars().next().unwrap();
            result.push(ch);
            cursor += ch.len_utf8();
        }

        result
    }

    /// Step 8: append `LIMIT 10` only when the query has neither `limit`
    /// nor `count(` (spec §4.9, §9).
    fn ensure_row_cap(sql: &str) -> String {
        let lowered = sql.to_lowercase();
        if lowered.contains("limit") || lowered.contains("count(") {
            sql.to_string()
        } else {
            let trimmed = sql.trim_end_matches(';').trim_end();
            format!("{trimmed} LIMIT 10")
        }
    }

    async fn execute(&self, sql: &str) -> sqlx::Result<Vec<HashMap<String, Value>>> {
        let rows = sqlx::query(sql).fetch_all(&self.db).await?;
        let mut mapped = Vec::with_capacity(rows.len().min(MAX_ROWS));
        for row in rows.into_iter().take(MAX_ROWS) {
            let mut map = HashMap::new();
            for column in row.columns() {
                let name = column.name().to_string();
                let value: Value = row
                    .try_get::<Option<String>, _>(name.as_str())
                    .map(|v| v.map(Value::String).unwrap_or(Value::Null))
                    .or_else(|_| row.try_get::<i64, _>(name.as_str()).map(|v| Value::from(v)))
                    .or_else(|_| row.try_get::<f64, _>(name.as_str()).map(|v| Value::from(v)))
                    .or_else(|_| row.try_get::<bool, _>(name.as_str()).map(Value::from))
                    .unwrap_or(Value::Null);
                map.insert(name, value);
            }
            mapped.push(map);
        }
        Ok(mapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> UserScope {
        UserScope { id: 7, name: "Jane Doe".to_string(), email: "jane@example.com".to_string() }
    }

    #[test]
    fn rejects_non_select() {
        assert!(matches!(
            SafeSqlExecutor::reject_not_select("UPDATE Vehicles SET Price = 1"),
            Err(SqlValidationError::NotASelect)
        ));
    }

    #[test]
    fn rejects_embedded_semicolon() {
        let sql = "SELECT * FROM Vehicles; DROP TABLE Users";
        assert!(SafeSqlExecutor::reject_embedded_semicolon(sql).is_err());
    }

    #[test]
    fn allows_trailing_semicolon() {
        let sql = "select * from Vehicles;";
        assert!(SafeSqlExecutor::reject_embedded_semicolon(sql).is_ok());
    }

    #[test]
    fn rejects_disallowed_table() {
        let sql = "select * from SecretTable";
        assert!(SafeSqlExecutor::reject_disallowed_tables(sql).is_err());
    }

    #[test]
    fn allows_allowlisted_table() {
        let sql = "select * from Vehicles join Auctions on Vehicles.Id = Auctions.VehicleId";
        assert!(SafeSqlExecutor::reject_disallowed_tables(sql).is_ok());
    }

    #[test]
    fn enforces_user_scope_mismatch() {
        let sql = "select * from Bids where UserId = 9";
        assert!(SafeSqlExecutor::enforce_user_scope(sql, &scope()).is_err());
    }

    #[test]
    fn allows_matching_user_scope() {
        let sql = "select * from Bids where UserId = 7";
        assert!(SafeSqlExecutor::enforce_user_scope(sql, &scope()).is_ok());
    }

    #[test]
    fn appends_limit_when_absent() {
        let sql = "select * from Vehicles";
        assert_eq!(SafeSqlExecutor::ensure_row_cap(sql), "select * from Vehicles LIMIT 10");
    }

    #[test]
    fn does_not_append_limit_when_present() {
        let sql = "select * from Vehicles limit 5";
        assert_eq!(SafeSqlExecutor::ensure_row_cap(sql), sql);
    }

    #[test]
    fn quotes_bare_table_identifier() {
        let quoted = SafeSqlExecutor::quote_identifiers("select * from Vehicles");
        assert!(quoted.contains("\"Vehicles\""));
    }
}
