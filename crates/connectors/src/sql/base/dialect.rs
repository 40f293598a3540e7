//! Database-specific SQL fragments used by the timeout query generator.

pub trait TimeoutDialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// - PostgreSQL uses double quotes: `"my_column"`
    /// - MySQL uses backticks: `` `my_column` ``
    fn quote_identifier(&self, ident: &str) -> String;

    /// Placeholder for the zero-based parameter `index`.
    fn get_placeholder(&self, index: usize) -> String;

    /// A placeholder cast to a 64-bit integer, for parameters whose type the
    /// server cannot infer (e.g. in a `SELECT` list).
    fn get_bigint_placeholder(&self, index: usize) -> String;

    /// Column type for timeout ids and other keyed strings.
    fn key_type(&self) -> &'static str {
        "VARCHAR(255)"
    }

    fn text_type(&self) -> &'static str;
    fn binary_type(&self) -> &'static str;
    fn timestamp_type(&self) -> &'static str;

    fn bigint_type(&self) -> &'static str {
        "BIGINT"
    }

    /// `expr` from the 1-based position `start` to its end.
    fn substring_from(&self, expr: &str, start: usize) -> String;

    fn concat(&self, left: &str, right: &str) -> String;

    /// Counts tables named by parameter 0 in the current schema.
    fn table_exists_sql(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl TimeoutDialect for Postgres {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!(r#""{}""#, ident.replace('"', r#""""#))
    }

    fn get_placeholder(&self, index: usize) -> String {
        format!("${}", index + 1)
    }

    fn get_bigint_placeholder(&self, index: usize) -> String {
        format!("CAST(${} AS BIGINT)", index + 1)
    }

    fn text_type(&self) -> &'static str {
        "TEXT"
    }

    fn binary_type(&self) -> &'static str {
        "BYTEA"
    }

    fn timestamp_type(&self) -> &'static str {
        "TIMESTAMPTZ"
    }

    fn substring_from(&self, expr: &str, start: usize) -> String {
        format!("substr({expr}, {start})")
    }

    fn concat(&self, left: &str, right: &str) -> String {
        format!("({left} || {right})")
    }

    fn table_exists_sql(&self) -> String {
        "SELECT COUNT(*) FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = $1"
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MySql;

impl TimeoutDialect for MySql {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn get_placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn get_bigint_placeholder(&self, _index: usize) -> String {
        "CAST(? AS SIGNED)".to_string()
    }

    fn text_type(&self) -> &'static str {
        "LONGTEXT"
    }

    fn binary_type(&self) -> &'static str {
        "LONGBLOB"
    }

    fn timestamp_type(&self) -> &'static str {
        "DATETIME(6)"
    }

    fn substring_from(&self, expr: &str, start: usize) -> String {
        format!("SUBSTRING({expr}, {start})")
    }

    fn concat(&self, left: &str, right: &str) -> String {
        format!("CONCAT({left}, {right})")
    }

    fn table_exists_sql(&self) -> String {
        "SELECT COUNT(*) FROM information_schema.tables \
         WHERE table_schema = DATABASE() AND table_name = ?"
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(Postgres.quote_identifier(r#"a"b"#), r#""a""b""#);
        assert_eq!(MySql.quote_identifier("a`b"), "`a``b`");
    }

    #[test]
    fn placeholders_follow_driver_conventions() {
        assert_eq!(Postgres.get_placeholder(0), "$1");
        assert_eq!(Postgres.get_bigint_placeholder(2), "CAST($3 AS BIGINT)");
        assert_eq!(MySql.get_placeholder(5), "?");
    }
}
