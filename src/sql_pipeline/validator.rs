//! Read-only guard for generated SQL
//!
//! Two layers: the statement must parse as exactly one query, and the
//! literal-stripped text must not contain a mutation keyword. Anything that
//! cannot be parsed is rejected.

use crate::error::{Result, SageError};
use regex::Regex;
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::sync::OnceLock;

const MUTATION_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "DROP", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE",
    "COPY", "CALL", "VACUUM", "ATTACH", "DETACH", "PRAGMA",
];

fn literal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"'(?:[^']|'')*'").expect("valid literal pattern"))
}

fn mutation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let alternation = MUTATION_KEYWORDS.join("|");
        Regex::new(&format!(r"(?i)\b({})\b", alternation)).expect("valid keyword pattern")
    })
}

pub struct SqlValidator;

impl SqlValidator {
    pub fn new() -> Self {
        Self
    }

    /// Accept only a single read-only query.
    pub fn validate(&self, sql: &str) -> Result<()> {
        let reject = |reason: String| SageError::UnsafeQuery {
            sql: sql.to_string(),
            reason,
        };

        let statements = Parser::parse_sql(&GenericDialect {}, sql)
            .map_err(|e| reject(format!("could not be parsed as a read-only query: {}", e)))?;

        match statements.as_slice() {
            [Statement::Query(query)] => {
                if !is_read_only(query) {
                    return Err(reject("query writes data (SELECT INTO or data-modifying clause)".to_string()));
                }
            }
            [] => return Err(reject("empty statement".to_string())),
            [_] => return Err(reject("only SELECT queries are allowed".to_string())),
            _ => return Err(reject(format!("expected one statement, found {}", statements.len()))),
        }

        let without_literals = literal_pattern().replace_all(sql, "''");
        if let Some(found) = mutation_pattern().find(&without_literals) {
            return Err(reject(format!("contains mutation keyword {}", found.as_str().to_uppercase())));
        }

        Ok(())
    }
}

impl Default for SqlValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn is_read_only(query: &Query) -> bool {
    if let Some(with) = &query.with {
        if !with.cte_tables.iter().all(|cte| is_read_only(&cte.query)) {
            return false;
        }
    }
    set_expr_read_only(&query.body)
}

fn set_expr_read_only(expr: &SetExpr) -> bool {
    match expr {
        SetExpr::Select(select) => select.into.is_none(),
        SetExpr::Query(query) => is_read_only(query),
        SetExpr::SetOperation { left, right, .. } => set_expr_read_only(left) && set_expr_read_only(right),
        SetExpr::Values(_) | SetExpr::Table(_) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(sql: &str) -> Result<()> {
        SqlValidator::new().validate(sql)
    }

    #[test]
    fn test_accepts_plain_select_and_cte() {
        assert!(check("SELECT name, SUM(revenue) FROM orders GROUP BY name ORDER BY 2 DESC LIMIT 10").is_ok());
        assert!(check("WITH t AS (SELECT * FROM orders) SELECT COUNT(*) FROM t").is_ok());
        assert!(check("SELECT a FROM x UNION SELECT a FROM y").is_ok());
    }

    #[test]
    fn test_keywords_inside_literals_are_ignored() {
        assert!(check("SELECT * FROM audit WHERE action = 'DELETE'").is_ok());
        assert!(check("SELECT updated_at FROM orders").is_ok());
    }

    #[test]
    fn test_rejects_mutations() {
        for sql in [
            "DELETE FROM orders",
            "UPDATE orders SET revenue = 0",
            "DROP TABLE orders",
            "INSERT INTO orders VALUES (1)",
            "SELECT * INTO backup FROM orders",
            "SELECT 1; DROP TABLE orders",
        ] {
            let err = check(sql).unwrap_err();
            assert_eq!(err.class(), "UnsafeQueryError", "{}", sql);
        }
    }

    #[test]
    fn test_unparseable_sql_fails_closed() {
        assert!(matches!(check("SELEC * FRM orders"), Err(SageError::UnsafeQuery { .. })));
    }
}
