//! Integration tests for the read-only admission gate.
//!
//! These exercise `guard_sql` end to end: comment stripping, the
//! single-statement and chaining checks, the keyword denylist, the leading
//! keyword allowlist and LIMIT injection.

use sql_governor::models::Violation;
use sql_governor::tools::guard::{
    DEFAULT_ROW_LIMIT, FORBIDDEN_KEYWORDS, enforce_limit, guard, guard_sql, has_statement_chaining,
    strip_comments,
};

#[test]
fn test_plain_select_gets_default_limit() {
    let decision = guard_sql("SELECT * FROM dim_player");
    assert!(decision.is_allowed());
    assert_eq!(decision.reason(), "");
    assert_eq!(decision.hardened_query(), "SELECT * FROM dim_player LIMIT 100;");
}

#[test]
fn test_chained_drop_is_rejected() {
    let decision = guard_sql("SELECT 1; DROP TABLE dim_player;");
    assert!(!decision.is_allowed());
    let reason = decision.reason();
    assert!(
        reason.contains("single SQL statement") || reason.contains("chaining"),
        "unexpected reason: {}",
        reason
    );
}

#[test]
fn test_delete_inside_cte_is_rejected() {
    let decision = guard_sql("WITH x AS (DELETE FROM dim_player RETURNING *) SELECT * FROM x");
    assert!(!decision.is_allowed());
    assert_eq!(
        decision.violation(),
        Some(&Violation::ForbiddenKeyword { keyword: "DELETE" })
    );
}

#[test]
fn test_explain_with_limit_is_unchanged() {
    let decision = guard_sql("EXPLAIN SELECT * FROM fact_penalty LIMIT 5");
    assert!(decision.is_allowed());
    assert_eq!(
        decision.hardened_query(),
        "EXPLAIN SELECT * FROM fact_penalty LIMIT 5"
    );
}

#[test]
fn test_semicolon_before_end_always_rejected() {
    let inputs = [
        "SELECT 1;SELECT 2",
        "SELECT 1 ; ",
        "SELECT ';' FROM t; ",
        "SELECT 1; -- trailing comment",
        "SELECT a FROM t WHERE b = 'x;y'",
        "select 1;\n\nselect 2;",
        "SELECT 1;;",
    ];
    for input in inputs {
        let cleaned = strip_comments(input);
        let decision = guard_sql(input);
        if has_statement_chaining(&cleaned) {
            assert!(!decision.is_allowed(), "should reject: {:?}", input);
        }
    }
    assert!(!guard_sql("SELECT 1;SELECT 2").is_allowed());
    assert!(!guard_sql("SELECT a FROM t WHERE b = 'x;y'").is_allowed());
    assert!(!guard_sql("SELECT 1;;").is_allowed());
}

#[test]
fn test_trailing_semicolon_is_allowed() {
    let decision = guard_sql("SELECT * FROM dim_player;");
    assert!(decision.is_allowed());
    assert_eq!(decision.hardened_query(), "SELECT * FROM dim_player LIMIT 100;");

    let decision = guard_sql("SELECT 1 ;  -- done");
    assert!(decision.is_allowed());
}

#[test]
fn test_non_allowlisted_leading_keyword_rejected() {
    let inputs = [
        "VALUES (1)",
        "  \n\t VALUES (1)",
        "((VALUES (1)))",
        "TABLE dim_player",
        "BEGIN",
        "FETCH ALL FROM c",
        "\"SELECT\" 1",
        "42",
    ];
    for input in inputs {
        let decision = guard_sql(input);
        assert!(!decision.is_allowed(), "should reject: {:?}", input);
    }
}

#[test]
fn test_wrapped_select_is_allowed() {
    for input in ["  (SELECT 1)", "\n\t((SELECT 1))", "with x as (select 1) select * from x"] {
        assert!(guard_sql(input).is_allowed(), "should allow: {:?}", input);
    }
}

#[test]
fn test_forbidden_keywords_as_standalone_tokens() {
    let inputs = [
        "SELECT 1 FROM t WHERE x IN (SELECT 1) DROP",
        "/*drop*/ SELECT * FROM t; drop table t",
        "SELECT * FROM t /* */ UNION SELECT * FROM pg_stat_activity FOR UPDATE",
        "select * from t where note = 'please delete me'",
        "EXPLAIN ANALYZE SELECT * FROM t",
        "SELECT set_config('x', 'y', false) FROM t; SET ROLE admin",
        "SELECT * FROM t LOCK",
        "SELECT $$ DROP TABLE t $$",
    ];
    for input in inputs {
        let decision = guard_sql(input);
        assert!(!decision.is_allowed(), "should reject: {:?}", input);
    }
}

#[test]
fn test_comment_hiding_a_keyword_boundary() {
    // The comment becomes a space, so "drop" and "table" stay separate words.
    let decision = guard_sql("SELECT 1 /*x*/drop/*y*/table t");
    assert!(!decision.is_allowed());
    assert_eq!(
        decision.violation(),
        Some(&Violation::ForbiddenKeyword { keyword: "DROP" })
    );
}

#[test]
fn test_keyword_only_inside_comment_is_ignored() {
    let decision = guard_sql("SELECT * FROM dim_player -- never DROP anything\n");
    assert!(decision.is_allowed());
    assert_eq!(decision.hardened_query(), "SELECT * FROM dim_player LIMIT 100;");
}

#[test]
fn test_identifiers_containing_keywords_are_allowed() {
    for input in [
        "SELECT updated_at, created_by FROM dim_player",
        "SELECT deleted FROM t",
        "SELECT * FROM showcase",
        "SELECT dropout_rate FROM fact_penalty",
    ] {
        assert!(guard_sql(input).is_allowed(), "should allow: {:?}", input);
    }
}

#[test]
fn test_every_denylisted_keyword_rejects() {
    for keyword in FORBIDDEN_KEYWORDS {
        let sql = format!("SELECT 1 FROM t WHERE {} ", keyword.to_lowercase());
        assert!(!guard_sql(&sql).is_allowed(), "should reject: {:?}", sql);
    }
}

#[test]
fn test_enforce_limit_is_idempotent() {
    let inputs = [
        "SELECT * FROM dim_player",
        "SELECT * FROM dim_player;",
        "SELECT * FROM dim_player ;  ",
        "SELECT * FROM t LIMIT 5",
        "select * from t limit\n10",
        "WITH x AS (SELECT 1) SELECT * FROM x",
    ];
    for input in inputs {
        let once = enforce_limit(input, DEFAULT_ROW_LIMIT);
        let twice = enforce_limit(&once, DEFAULT_ROW_LIMIT);
        assert_eq!(once, twice, "not idempotent for {:?}", input);
    }
}

#[test]
fn test_existing_limit_preserved_apart_from_cleaning() {
    let decision = guard_sql("  SELECT * FROM fact_penalty /* recent */ LIMIT 20  ");
    assert!(decision.is_allowed());
    assert_eq!(
        decision.hardened_query(),
        "SELECT * FROM fact_penalty   LIMIT 20"
    );

    let decision = guard_sql("select * from t limit 7;");
    assert_eq!(decision.hardened_query(), "select * from t limit 7;");
}

#[test]
fn test_custom_default_limit() {
    let decision = guard("SELECT * FROM dim_player", 25);
    assert_eq!(decision.hardened_query(), "SELECT * FROM dim_player LIMIT 25;");
}

#[test]
fn test_strip_comments_round_trips_clean_text() {
    for input in [
        "SELECT 1",
        "SELECT a, b FROM t WHERE c = 'x' ORDER BY a",
        "SELECT '--not a comment', \"/*nor this*/\" FROM t",
        "SELECT $tag$ -- body $tag$",
        "SELECT a / b * c FROM t",
        "SELECT a - b FROM t",
    ] {
        assert_eq!(strip_comments(input), input);
    }
}

#[test]
fn test_empty_and_comment_only_inputs_rejected() {
    for input in ["", "   ", "\n\t", "-- just a comment", "/* block */", "/* a */ -- b\n"] {
        let decision = guard_sql(input);
        assert!(!decision.is_allowed());
        assert_eq!(decision.violation(), Some(&Violation::Empty));
    }
}

#[test]
fn test_rejected_decision_serializes_cleaned_text() {
    let decision = guard_sql("DROP TABLE dim_player -- bye");
    let json = serde_json::to_value(&decision).unwrap();
    assert_eq!(json["allowed"], false);
    assert_eq!(json["hardened_query"], "DROP TABLE dim_player");
    assert!(!json["reason"].as_str().unwrap().is_empty());
}

#[test]
fn test_select_into_is_rejected() {
    for input in [
        "SELECT * INTO scratch_copy FROM dim_player",
        "select player_id into temp scratch from dim_player -- copy",
        "EXPLAIN SELECT * INTO scratch_copy FROM dim_player",
    ] {
        let decision = guard_sql(input);
        assert!(!decision.is_allowed(), "should reject: {:?}", input);
        assert_eq!(
            decision.violation(),
            Some(&Violation::NotReadOnly {
                statement: "SELECT INTO"
            })
        );
    }
}
