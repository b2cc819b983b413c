//! Admission decision types produced by the policy gate.

use serde::Serialize;
use std::fmt;

/// Why the policy gate refused a query.
///
/// Every variant is recoverable: the reason is handed back to the agent so it
/// can rewrite the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Nothing left after comments and whitespace were removed.
    Empty,
    /// The tokenizer found more than one statement.
    MultipleStatements { count: usize },
    /// A `;` appears before the end of the query text.
    StatementChaining,
    /// A denylisted keyword occurs as a standalone word.
    ForbiddenKeyword { keyword: &'static str },
    /// The first keyword is not SELECT, WITH or EXPLAIN.
    DisallowedLeadingKeyword { keyword: Option<String> },
    /// The parsed statement is not a plain query.
    NotReadOnly { statement: &'static str },
    /// The SQL tokenizer could not make sense of the text.
    Untokenizable { message: String },
}

impl Violation {
    /// Short machine-friendly category, used as a structured log field.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Empty => "empty_statement",
            Self::MultipleStatements { .. } => "multiple_statements",
            Self::StatementChaining => "statement_chaining",
            Self::ForbiddenKeyword { .. } => "forbidden_keyword",
            Self::DisallowedLeadingKeyword { .. } => "disallowed_statement",
            Self::NotReadOnly { .. } => "not_read_only",
            Self::Untokenizable { .. } => "untokenizable",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(
                f,
                "Query is empty. Provide a single SELECT, WITH or EXPLAIN statement."
            ),
            Self::MultipleStatements { count } => write!(
                f,
                "Only a single SQL statement is allowed (found {}). Submit one read-only statement.",
                count
            ),
            Self::StatementChaining => write!(
                f,
                "Statement chaining is not allowed: ';' may only appear at the very end of the query."
            ),
            Self::ForbiddenKeyword { keyword } => write!(
                f,
                "Forbidden keyword '{}' found. Only read-only queries are allowed.",
                keyword
            ),
            Self::DisallowedLeadingKeyword { keyword: Some(keyword) } => write!(
                f,
                "Statements starting with '{}' are not allowed. Only SELECT, WITH or EXPLAIN queries are allowed.",
                keyword
            ),
            Self::DisallowedLeadingKeyword { keyword: None } => write!(
                f,
                "No leading SQL keyword found. Only SELECT, WITH or EXPLAIN queries are allowed."
            ),
            Self::NotReadOnly { statement } => write!(
                f,
                "{} statements are not allowed. Only read-only queries are allowed.",
                statement
            ),
            Self::Untokenizable { message } => {
                write!(f, "Query could not be tokenized: {}", message)
            }
        }
    }
}

/// Outcome of running a raw query through the policy gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// The query may run. `hardened_query` is the text to execute.
    Allowed { hardened_query: String },
    /// The query was refused. `cleaned_query` is the comment-stripped text,
    /// returned for the caller's benefit and never executed.
    Rejected {
        violation: Violation,
        cleaned_query: String,
    },
}

impl GuardDecision {
    pub fn allowed(hardened_query: impl Into<String>) -> Self {
        Self::Allowed {
            hardened_query: hardened_query.into(),
        }
    }

    pub fn rejected(violation: Violation, cleaned_query: impl Into<String>) -> Self {
        Self::Rejected {
            violation,
            cleaned_query: cleaned_query.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Human-readable rejection reason; empty when allowed.
    pub fn reason(&self) -> String {
        match self {
            Self::Allowed { .. } => String::new(),
            Self::Rejected { violation, .. } => violation.to_string(),
        }
    }

    /// The hardened query when allowed, otherwise the cleaned (unexecuted) text.
    pub fn hardened_query(&self) -> &str {
        match self {
            Self::Allowed { hardened_query } => hardened_query,
            Self::Rejected { cleaned_query, .. } => cleaned_query,
        }
    }

    pub fn violation(&self) -> Option<&Violation> {
        match self {
            Self::Allowed { .. } => None,
            Self::Rejected { violation, .. } => Some(violation),
        }
    }
}

#[derive(Serialize)]
struct GuardDecisionView<'a> {
    allowed: bool,
    reason: String,
    hardened_query: &'a str,
}

impl Serialize for GuardDecision {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        GuardDecisionView {
            allowed: self.is_allowed(),
            reason: self.reason(),
            hardened_query: self.hardened_query(),
        }
        .serialize(serializer)
    }
}
