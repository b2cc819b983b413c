//! Read-only admission gate for agent-generated SQL.
//!
//! [`guard`] decides whether a raw SQL string may run against the database
//! and, if so, returns the hardened text to execute. Checks run in a fixed
//! order, each one on the comment-stripped text:
//!
//! 1. strip comments
//! 2. reject empty input
//! 3. require a single statement (PostgreSQL tokenizer)
//! 4. reject `;` anywhere but the very end
//! 5. scan for denylisted keywords
//! 6. require a SELECT/WITH/EXPLAIN leading keyword
//! 7. refuse parsed statements that are not queries
//! 8. inject a `LIMIT` when none is present
//!
//! Rejections are returned as [`GuardDecision::Rejected`]; nothing here panics
//! or performs I/O.

use crate::models::{GuardDecision, Violation};
use crate::tools::sql_validator::{
    AstCheck, check_read_only_ast, is_allowed_leading_keyword, statement_count,
    top_level_keyword,
};
use tracing::debug;

/// Row limit injected when the query carries none.
pub const DEFAULT_ROW_LIMIT: u32 = 100;

/// Keywords that reject a query wherever they occur as standalone words.
///
/// Multi-word entries match consecutive words with any whitespace between.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "UPDATE",
    "DELETE",
    "INSERT",
    "UPSERT",
    "MERGE",
    "CREATE",
    "ALTER",
    "DROP",
    "TRUNCATE",
    "GRANT",
    "REVOKE",
    "COMMENT",
    "VACUUM",
    "COPY",
    "CALL",
    "DO",
    "EXECUTE",
    "PREPARE",
    "LISTEN",
    "NOTIFY",
    "SET ROLE",
    "SET SESSION",
    "RESET",
    "SHOW",
    "LOCK",
    "REFRESH MATERIALIZED",
    "ANALYZE",
    "CLUSTER",
    "REINDEX",
    "SECURITY DEFINER",
];

/// Remove `--` line comments and `/* */` block comments, then trim.
///
/// Block comments nest and are replaced by a single space; line comments are
/// dropped up to (not including) the newline. Comment markers inside
/// single-quoted strings, `E''` strings, double-quoted identifiers and
/// dollar-quoted bodies are left alone.
///
/// # Examples
///
/// ```
/// use sql_governor::tools::guard::strip_comments;
///
/// assert_eq!(strip_comments("SELECT 1 -- trailing"), "SELECT 1");
/// assert_eq!(strip_comments("SELECT/*x*/1"), "SELECT 1");
/// assert_eq!(strip_comments("SELECT '--not a comment'"), "SELECT '--not a comment'");
/// ```
pub fn strip_comments(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if next == Some('*') => {
                i = skip_block_comment(&chars, i);
                out.push(' ');
            }
            '\'' => {
                let escapes = i > 0
                    && matches!(chars[i - 1], 'E' | 'e')
                    && (i < 2 || !is_word_char(chars[i - 2]));
                i = copy_quoted(&chars, i, '\'', escapes, &mut out);
            }
            '"' => {
                i = copy_quoted(&chars, i, '"', false, &mut out);
            }
            '$' if i == 0 || !is_word_char(chars[i - 1]) => match dollar_tag_end(&chars, i) {
                Some(tag_end) => i = copy_dollar_quoted(&chars, i, tag_end, &mut out),
                None => {
                    out.push(c);
                    i += 1;
                }
            },
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out.trim().to_string()
}

/// Skip a (possibly nested) block comment starting at `start`. Returns the
/// index just past its end, or the end of input when unterminated.
fn skip_block_comment(chars: &[char], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;

    while i < chars.len() {
        match (chars[i], chars.get(i + 1).copied()) {
            ('/', Some('*')) => {
                depth += 1;
                i += 2;
            }
            ('*', Some('/')) => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }

    chars.len()
}

/// Copy a quoted literal verbatim. A doubled quote is an escaped quote; with
/// `escapes`, a backslash escapes the following character.
fn copy_quoted(
    chars: &[char],
    start: usize,
    quote: char,
    escapes: bool,
    out: &mut String,
) -> usize {
    out.push(quote);
    let mut i = start + 1;

    while i < chars.len() {
        let c = chars[i];
        if escapes && c == '\\' {
            out.push(c);
            if let Some(&escaped) = chars.get(i + 1) {
                out.push(escaped);
            }
            i += 2;
            continue;
        }
        out.push(c);
        i += 1;
        if c == quote {
            if chars.get(i) == Some(&quote) {
                out.push(quote);
                i += 1;
            } else {
                return i;
            }
        }
    }

    chars.len()
}

/// If a dollar-quote tag (`$$` or `$tag$`) starts at `start`, return the index
/// of its closing `$`.
fn dollar_tag_end(chars: &[char], start: usize) -> Option<usize> {
    let mut i = start + 1;
    if let Some(&first) = chars.get(i) {
        if first.is_ascii_digit() {
            return None;
        }
    }
    while let Some(&c) = chars.get(i) {
        if c == '$' {
            return Some(i);
        }
        if !is_word_char(c) {
            return None;
        }
        i += 1;
    }
    None
}

fn copy_dollar_quoted(chars: &[char], start: usize, tag_end: usize, out: &mut String) -> usize {
    let tag = &chars[start..=tag_end];
    let mut i = tag_end + 1;

    while i < chars.len() {
        if chars[i..].starts_with(tag) {
            i += tag.len();
            out.extend(&chars[start..i]);
            return i;
        }
        i += 1;
    }

    out.extend(&chars[start..]);
    chars.len()
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// True when a `;` appears anywhere before the final character of the trimmed
/// text. Quoting is ignored on purpose.
pub fn has_statement_chaining(sql: &str) -> bool {
    let trimmed = sql.trim();
    trimmed
        .char_indices()
        .any(|(idx, c)| c == ';' && idx + 1 < trimmed.len())
}

/// Uppercased ASCII words of `sql`, in order.
fn words(sql: &str) -> Vec<String> {
    sql.split(|c: char| !is_word_char(c))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_uppercase())
        .collect()
}

/// First denylisted keyword occurring as a standalone word, case-insensitive.
pub fn find_forbidden_keyword(sql: &str) -> Option<&'static str> {
    let words = words(sql);

    FORBIDDEN_KEYWORDS.iter().copied().find(|keyword| {
        let parts: Vec<&str> = keyword.split_whitespace().collect();
        words
            .windows(parts.len())
            .any(|window| window.iter().zip(&parts).all(|(w, p)| w == p))
    })
}

pub fn contains_forbidden_keyword(sql: &str) -> bool {
    find_forbidden_keyword(sql).is_some()
}

/// True when the text contains `LIMIT <digits>` in any casing.
pub fn has_limit_clause(sql: &str) -> bool {
    let upper = sql.to_ascii_uppercase();
    let bytes = upper.as_bytes();

    upper.match_indices("LIMIT").any(|(idx, _)| {
        if idx > 0 && is_word_char(bytes[idx - 1] as char) {
            return false;
        }
        let mut j = idx + "LIMIT".len();
        let ws_start = j;
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        j > ws_start && j < bytes.len() && bytes[j].is_ascii_digit()
    })
}

/// Append ` LIMIT <limit>;` unless a `LIMIT <n>` clause is already present.
///
/// Trailing semicolons and whitespace are removed before appending. Applying
/// this twice gives the same text as applying it once.
///
/// # Examples
///
/// ```
/// use sql_governor::tools::guard::enforce_limit;
///
/// assert_eq!(enforce_limit("SELECT 1;", 100), "SELECT 1 LIMIT 100;");
/// assert_eq!(enforce_limit("SELECT 1 limit 5", 100), "SELECT 1 limit 5");
/// ```
pub fn enforce_limit(sql: &str, limit: u32) -> String {
    if has_limit_clause(sql) {
        return sql.to_string();
    }
    let body = sql.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    format!("{} LIMIT {};", body, limit)
}

/// Run the full admission gate over a raw query.
pub fn guard(raw_sql: &str, default_limit: u32) -> GuardDecision {
    let cleaned = strip_comments(raw_sql);

    if cleaned.is_empty() {
        return GuardDecision::rejected(Violation::Empty, cleaned);
    }

    match statement_count(&cleaned) {
        Ok(1) => {}
        Ok(count) => {
            return GuardDecision::rejected(Violation::MultipleStatements { count }, cleaned);
        }
        Err(e) => {
            return GuardDecision::rejected(
                Violation::Untokenizable {
                    message: e.to_string(),
                },
                cleaned,
            );
        }
    }

    if has_statement_chaining(&cleaned) {
        return GuardDecision::rejected(Violation::StatementChaining, cleaned);
    }

    if let Some(keyword) = find_forbidden_keyword(&cleaned) {
        return GuardDecision::rejected(Violation::ForbiddenKeyword { keyword }, cleaned);
    }

    match top_level_keyword(&cleaned) {
        Some(keyword) if is_allowed_leading_keyword(&keyword) => {}
        keyword => {
            return GuardDecision::rejected(
                Violation::DisallowedLeadingKeyword { keyword },
                cleaned,
            );
        }
    }

    match check_read_only_ast(&cleaned) {
        AstCheck::ReadOnly => {}
        AstCheck::Refused { statement } => {
            return GuardDecision::rejected(Violation::NotReadOnly { statement }, cleaned);
        }
        AstCheck::Unparsed { message } => {
            debug!(error = %message, "AST check skipped; query did not parse");
        }
    }

    GuardDecision::allowed(enforce_limit(&cleaned, default_limit))
}

/// [`guard`] with the default row limit of 100.
pub fn guard_sql(raw_sql: &str) -> GuardDecision {
    guard(raw_sql, DEFAULT_ROW_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_line_comment_keeps_newline() {
        assert_eq!(strip_comments("SELECT 1 -- c\nFROM t"), "SELECT 1 \nFROM t");
    }

    #[test]
    fn test_strip_multiline_block_comment() {
        assert_eq!(strip_comments("SELECT /* a\n b */ 1"), "SELECT   1");
    }

    #[test]
    fn test_strip_nested_block_comment() {
        assert_eq!(strip_comments("SELECT /* a /* b */ c */ 1"), "SELECT   1");
    }

    #[test]
    fn test_strip_unterminated_block_comment() {
        assert_eq!(strip_comments("SELECT 1 /* never closed"), "SELECT 1");
    }

    #[test]
    fn test_comment_markers_inside_literals_survive() {
        let sql = "SELECT '/* x */', \"a--b\", $$ -- y $$, $tag$/*z*/$tag$";
        assert_eq!(strip_comments(sql), sql);
    }

    #[test]
    fn test_doubled_quote_and_escape_string() {
        assert_eq!(strip_comments("SELECT 'it''s -- ok'"), "SELECT 'it''s -- ok'");
        assert_eq!(strip_comments("SELECT E'\\' -- x' FROM t"), "SELECT E'\\' -- x' FROM t");
    }

    #[test]
    fn test_comment_glued_between_tokens() {
        assert_eq!(strip_comments("DROP/**/TABLE x"), "DROP TABLE x");
    }

    #[test]
    fn test_chaining_detection() {
        assert!(has_statement_chaining("SELECT 1; SELECT 2"));
        assert!(has_statement_chaining("SELECT ';' FROM t"));
        assert!(!has_statement_chaining("SELECT 1;"));
        assert!(!has_statement_chaining("  SELECT 1;  "));
        assert!(!has_statement_chaining("SELECT 1"));
    }

    #[test]
    fn test_forbidden_keyword_whole_word_only() {
        assert_eq!(find_forbidden_keyword("select * from t where x = 1"), None);
        assert_eq!(find_forbidden_keyword("SELECT created_at, last_update FROM t"), None);
        assert_eq!(find_forbidden_keyword("SELECT updated FROM t"), None);
        assert_eq!(find_forbidden_keyword("select 1; drop table t"), Some("DROP"));
        assert_eq!(find_forbidden_keyword("SELECT 1 FROM t FOR UPDATE"), Some("UPDATE"));
    }

    #[test]
    fn test_forbidden_keyword_multi_word() {
        assert_eq!(find_forbidden_keyword("SET  ROLE admin"), Some("SET ROLE"));
        assert_eq!(
            find_forbidden_keyword("refresh\nmaterialized view v"),
            Some("REFRESH MATERIALIZED")
        );
        assert_eq!(find_forbidden_keyword("SELECT set_role FROM t"), None);
        assert_eq!(find_forbidden_keyword("SELECT refresh FROM t"), None);
    }

    #[test]
    fn test_forbidden_keyword_inside_quotes_is_still_found() {
        assert!(contains_forbidden_keyword("SELECT 'drop' AS word"));
        assert!(contains_forbidden_keyword("SELECT $$DELETE$$"));
    }

    #[test]
    fn test_has_limit_clause() {
        assert!(has_limit_clause("SELECT 1 LIMIT 5"));
        assert!(has_limit_clause("select 1 limit\n 10;"));
        assert!(!has_limit_clause("SELECT unlimit 5"));
        assert!(!has_limit_clause("SELECT 1 LIMIT ALL"));
        assert!(!has_limit_clause("SELECT limit5"));
        assert!(!has_limit_clause("SELECT 1"));
    }

    #[test]
    fn test_limit_inside_literal_counts_as_limit() {
        let sql = "SELECT * FROM t WHERE note = 'limit 5'";
        assert!(has_limit_clause(sql));
        assert_eq!(enforce_limit(sql, DEFAULT_ROW_LIMIT), sql);
    }

    #[test]
    fn test_enforce_limit_strips_trailing_semicolons() {
        assert_eq!(enforce_limit("SELECT 1 ; ;  ", 100), "SELECT 1 LIMIT 100;");
        assert_eq!(enforce_limit("SELECT 1", 7), "SELECT 1 LIMIT 7;");
    }

    #[test]
    fn test_guard_rejects_empty() {
        let decision = guard_sql("  -- only a comment\n /* and another */ ");
        assert_eq!(decision.violation(), Some(&Violation::Empty));
    }

    #[test]
    fn test_guard_rejects_untokenizable() {
        let decision = guard_sql("SELECT 'unterminated");
        assert!(matches!(
            decision.violation(),
            Some(Violation::Untokenizable { .. })
        ));
    }

    #[test]
    fn test_guard_rejects_leading_values() {
        let decision = guard_sql("VALUES (1)");
        assert!(matches!(
            decision.violation(),
            Some(Violation::DisallowedLeadingKeyword { keyword: Some(k) }) if k == "VALUES"
        ));
    }

    #[test]
    fn test_guard_rejects_explain_analyze_of_write() {
        // EXPLAIN leads and the denylist catches the inner verb first
        let decision = guard_sql("EXPLAIN ANALYZE INSERT INTO t VALUES (1)");
        assert!(!decision.is_allowed());
    }

    #[test]
    fn test_guard_rejects_select_into() {
        for sql in [
            "SELECT * INTO scratch_copy FROM dim_player",
            "EXPLAIN SELECT * INTO scratch_copy FROM dim_player",
        ] {
            let decision = guard_sql(sql);
            assert!(!decision.is_allowed(), "should reject: {:?}", sql);
            assert_eq!(
                decision.violation(),
                Some(&Violation::NotReadOnly {
                    statement: "SELECT INTO"
                })
            );
        }
    }

    #[test]
    fn test_guard_uses_custom_limit() {
        let decision = guard("SELECT * FROM t", 25);
        assert_eq!(decision.hardened_query(), "SELECT * FROM t LIMIT 25;");
    }

    #[test]
    fn test_rejection_returns_cleaned_query() {
        let decision = guard_sql("/* hi */ DROP TABLE t");
        assert!(!decision.is_allowed());
        assert_eq!(decision.hardened_query(), "DROP TABLE t");
    }
}
