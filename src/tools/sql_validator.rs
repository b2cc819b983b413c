//! Tokenizer and AST checks backing the read-only policy gate.
//!
//! The textual gate in [`crate::tools::guard`] is authoritative. This module
//! provides the pieces that need a real SQL lexer or parser:
//!
//! - statement counting over the PostgreSQL token stream
//! - the top-level keyword of a statement
//! - AST classification of the parsed statement
//!
//! Uses [sqlparser](https://docs.rs/sqlparser/) with the PostgreSQL dialect.

use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer, TokenizerError};

/// Leading keywords a read-only statement may start with.
pub const ALLOWED_LEADING_KEYWORDS: &[&str] = &["SELECT", "WITH", "EXPLAIN"];

/// Broad category of a parsed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementClass {
    /// SELECT, VALUES, set operations and CTE queries
    Query,
    /// INSERT, UPDATE, DELETE, MERGE, COPY, SELECT INTO
    Write,
    /// CREATE, ALTER, DROP, TRUNCATE, COMMENT
    Ddl,
    /// BEGIN, COMMIT, ROLLBACK, SAVEPOINT
    Transaction,
    /// CALL, EXECUTE, PREPARE
    ProcedureCall,
    /// GRANT, REVOKE, SET, VACUUM and friends
    Administrative,
    Unknown,
}

/// Outcome of the AST pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AstCheck {
    /// Parsed, and every statement is a plain query.
    ReadOnly,
    /// Parsed, and a statement is something other than a query.
    Refused { statement: &'static str },
    /// sqlparser could not parse the text. Not a rejection on its own.
    Unparsed { message: String },
}

fn tokenize(sql: &str) -> Result<Vec<Token>, TokenizerError> {
    let dialect = PostgreSqlDialect {};
    Tokenizer::new(&dialect, sql).tokenize()
}

/// Count the non-empty statements separated by top-level `;` tokens.
///
/// Semicolons inside string literals, quoted identifiers and dollar-quoted
/// bodies are part of their token and do not split statements.
pub fn statement_count(sql: &str) -> Result<usize, TokenizerError> {
    let mut count = 0;
    let mut in_statement = false;

    for token in tokenize(sql)? {
        match token {
            Token::SemiColon => in_statement = false,
            Token::Whitespace(_) | Token::EOF => {}
            _ => {
                if !in_statement {
                    count += 1;
                    in_statement = true;
                }
            }
        }
    }

    Ok(count)
}

/// True when the text tokenizes into exactly one non-empty statement.
pub fn is_single_statement(sql: &str) -> bool {
    matches!(statement_count(sql), Ok(1))
}

/// First keyword of the statement, uppercased.
///
/// Leading whitespace and opening parentheses are skipped. Returns `None` for
/// untokenizable text or when the first significant token is not a bare word.
pub fn top_level_keyword(sql: &str) -> Option<String> {
    let tokens = tokenize(sql).ok()?;
    tokens
        .into_iter()
        .find(|t| !matches!(t, Token::Whitespace(_) | Token::LParen))
        .and_then(|t| match t {
            Token::Word(word) if word.quote_style.is_none() => {
                Some(word.value.to_ascii_uppercase())
            }
            _ => None,
        })
}

/// True when `keyword` may lead a read-only statement.
pub fn is_allowed_leading_keyword(keyword: &str) -> bool {
    ALLOWED_LEADING_KEYWORDS
        .iter()
        .any(|k| k.eq_ignore_ascii_case(keyword))
}

/// Parse with the PostgreSQL dialect and require every statement to be a query.
///
/// # Examples
///
/// ```
/// use sql_governor::tools::sql_validator::{check_read_only_ast, AstCheck};
///
/// assert_eq!(check_read_only_ast("SELECT * FROM users"), AstCheck::ReadOnly);
/// assert!(matches!(
///     check_read_only_ast("INSERT INTO users VALUES (1)"),
///     AstCheck::Refused { statement: "INSERT" }
/// ));
/// ```
pub fn check_read_only_ast(sql: &str) -> AstCheck {
    let dialect = PostgreSqlDialect {};

    let statements = match Parser::parse_sql(&dialect, sql) {
        Ok(statements) => statements,
        Err(e) => {
            return AstCheck::Unparsed {
                message: e.to_string(),
            };
        }
    };

    for stmt in &statements {
        let (class, name) = classify_statement(stmt);
        if class != StatementClass::Query {
            return AstCheck::Refused { statement: name };
        }
    }

    AstCheck::ReadOnly
}

/// Classify a parsed statement.
pub fn classify_statement(stmt: &Statement) -> (StatementClass, &'static str) {
    match stmt {
        // SELECT ... INTO creates a table.
        Statement::Query(query) if writes_into_table(&query.body) => {
            (StatementClass::Write, "SELECT INTO")
        }
        Statement::Query(_) => (StatementClass::Query, "SELECT"),

        // EXPLAIN is only as safe as what it explains; EXPLAIN ANALYZE runs it.
        Statement::Explain { statement, .. } => {
            let (inner_class, inner_name) = classify_statement(statement);
            if inner_class == StatementClass::Query {
                (StatementClass::Query, "EXPLAIN")
            } else {
                (inner_class, inner_name)
            }
        }

        Statement::Insert(_) => (StatementClass::Write, "INSERT"),
        Statement::Update { .. } => (StatementClass::Write, "UPDATE"),
        Statement::Delete(_) => (StatementClass::Write, "DELETE"),
        Statement::Merge { .. } => (StatementClass::Write, "MERGE"),
        Statement::Copy { .. } => (StatementClass::Write, "COPY"),

        Statement::CreateTable { .. } => (StatementClass::Ddl, "CREATE TABLE"),
        Statement::CreateView { .. } => (StatementClass::Ddl, "CREATE VIEW"),
        Statement::CreateIndex(_) => (StatementClass::Ddl, "CREATE INDEX"),
        Statement::CreateSchema { .. } => (StatementClass::Ddl, "CREATE SCHEMA"),
        Statement::CreateFunction { .. } => (StatementClass::Ddl, "CREATE FUNCTION"),
        Statement::CreateRole { .. } => (StatementClass::Ddl, "CREATE ROLE"),
        Statement::CreateExtension { .. } => (StatementClass::Ddl, "CREATE EXTENSION"),
        Statement::AlterTable { .. } => (StatementClass::Ddl, "ALTER TABLE"),
        Statement::AlterView { .. } => (StatementClass::Ddl, "ALTER VIEW"),
        Statement::AlterIndex { .. } => (StatementClass::Ddl, "ALTER INDEX"),
        Statement::AlterRole { .. } => (StatementClass::Ddl, "ALTER ROLE"),
        Statement::Drop { .. } => (StatementClass::Ddl, "DROP"),
        Statement::DropFunction { .. } => (StatementClass::Ddl, "DROP FUNCTION"),
        Statement::Truncate { .. } => (StatementClass::Ddl, "TRUNCATE"),
        Statement::Comment { .. } => (StatementClass::Ddl, "COMMENT"),

        Statement::StartTransaction { .. } => (StatementClass::Transaction, "BEGIN"),
        Statement::Commit { .. } => (StatementClass::Transaction, "COMMIT"),
        Statement::Rollback { .. } => (StatementClass::Transaction, "ROLLBACK"),
        Statement::Savepoint { .. } => (StatementClass::Transaction, "SAVEPOINT"),

        Statement::Call { .. } => (StatementClass::ProcedureCall, "CALL"),
        Statement::Execute { .. } => (StatementClass::ProcedureCall, "EXECUTE"),
        Statement::Prepare { .. } => (StatementClass::ProcedureCall, "PREPARE"),

        Statement::Grant { .. } => (StatementClass::Administrative, "GRANT"),
        Statement::Revoke { .. } => (StatementClass::Administrative, "REVOKE"),
        Statement::Set(_) => (StatementClass::Administrative, "SET"),
        Statement::Analyze { .. } => (StatementClass::Administrative, "ANALYZE"),
        Statement::Discard { .. } => (StatementClass::Administrative, "DISCARD"),
        Statement::LISTEN { .. } => (StatementClass::Administrative, "LISTEN"),
        Statement::NOTIFY { .. } => (StatementClass::Administrative, "NOTIFY"),

        _ => (StatementClass::Unknown, "Unrecognized"),
    }
}

fn writes_into_table(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_some(),
        SetExpr::Query(query) => writes_into_table(&query.body),
        SetExpr::SetOperation { left, right, .. } => {
            writes_into_table(left) || writes_into_table(right)
        }
        _ => false,
    }
}
