/// Whether a statement produces rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// SELECT-like statements; answered with a DATA block, even an empty one.
    Query,
    /// DDL/DML; answered with END_OF_STREAM only.
    Command,
}

const ROW_RETURNING: [&str; 7] = ["select", "with", "show", "desc", "describe", "explain", "exists"];

impl StatementKind {
    pub fn classify(sql: &str) -> Self {
        match leading_keyword(sql) {
            Some(word) if ROW_RETURNING.contains(&word.to_lowercase().as_str()) => {
                StatementKind::Query
            }
            _ => StatementKind::Command,
        }
    }

    pub fn returns_rows(self) -> bool {
        self == StatementKind::Query
    }
}

/// First keyword of `sql`, skipping whitespace, comments and opening parentheses.
fn leading_keyword(mut sql: &str) -> Option<&str> {
    loop {
        sql = sql.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(rest) = sql.strip_prefix("--") {
            sql = rest.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(rest) = sql.strip_prefix("/*") {
            sql = rest.split_once("*/").map(|(_, tail)| tail).unwrap_or("");
        } else {
            break;
        }
    }

    let end = sql
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(sql.len());
    (end > 0).then(|| &sql[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_statements() {
        for sql in [
            "SELECT 1 as num",
            "select * from t",
            "  WITH x AS (SELECT 1) SELECT * FROM x",
            "(SELECT 1) UNION ALL (SELECT 2)",
            "SHOW TABLES",
            "DESCRIBE TABLE t",
            "EXPLAIN SELECT 1",
        ] {
            assert_eq!(StatementKind::classify(sql), StatementKind::Query, "{sql}");
        }
    }

    #[test]
    fn command_statements() {
        for sql in [
            "CREATE TABLE t (x UInt8) ENGINE = Memory",
            "INSERT INTO t VALUES (1)",
            "DROP TABLE t",
            "selectivity",
            "",
        ] {
            assert_eq!(StatementKind::classify(sql), StatementKind::Command, "{sql}");
        }
    }

    #[test]
    fn skips_leading_comments() {
        assert_eq!(
            StatementKind::classify("-- fetch\n/* numbers */ SELECT 1"),
            StatementKind::Query
        );
        assert_eq!(
            StatementKind::classify("/* unterminated SELECT 1"),
            StatementKind::Command
        );
    }

    #[test]
    fn case_insensitive() {
        assert!(StatementKind::classify("SeLeCt 1").returns_rows());
    }
}
