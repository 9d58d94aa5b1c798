//! PostgreSQL schema for the account ledger

/// Account ledger. Row `id = 0` is the fee collector.
pub const CREATE_ACCOUNTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id      INTEGER PRIMARY KEY,
    balance NUMERIC(15, 2) NOT NULL
)
"#;

/// Statements run by `ensure_schema`, in order
pub const SCHEMA: &[&str] = &[CREATE_ACCOUNTS_TABLE];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accounts_table_shape() {
        assert!(CREATE_ACCOUNTS_TABLE.contains("id      INTEGER PRIMARY KEY"));
        assert!(CREATE_ACCOUNTS_TABLE.contains("NUMERIC(15, 2) NOT NULL"));
        assert_eq!(SCHEMA.len(), 1);
    }
}
