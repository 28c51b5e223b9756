//! Statement classifier - the safety gate in front of every executor
//!
//! Decides from raw SQL text alone whether a statement may run under the
//! caller's declared category. There is no parser here: each rule is a
//! lexical pattern test, and the rules run in a fixed order so the first
//! violated rule is the one reported.
//!
//! Rules, in order:
//! 1. blank text is rejected
//! 2. the leading keyword must open the declared category
//! 3. no category-forbidden keyword anywhere (whole word)
//! 4. no procedure/dynamic-SQL invocation anywhere
//! 5. no comment markers anywhere

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

// ============================================================================
// Patterns
// ============================================================================

static SELECT_OPENER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*SELECT\b").expect("Invalid regex"));

static DML_OPENER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(INSERT|UPDATE|DELETE)\b").expect("Invalid regex"));

/// Anything that writes, including writes smuggled through subqueries or CTEs
static READ_ONLY_FORBIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|TRUNCATE|GRANT|REVOKE|MERGE)\b")
        .expect("Invalid regex")
});

static MUTATION_FORBIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(DROP|CREATE|ALTER|TRUNCATE|GRANT|REVOKE)\b").expect("Invalid regex")
});

/// `SP_` and `XP_` are system procedure prefixes, so they match with any
/// identifier tail (`sp_who`, `XP_CMDSHELL`).
static DANGEROUS_INVOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(EXECUTE|EXEC|CALL)\b|\b(SP_|XP_)\w*").expect("Invalid regex")
});

static COMMENT_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\*|\*/|--").expect("Invalid regex"));

// ============================================================================
// Types
// ============================================================================

/// Declared intent of a statement, selecting which policy applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementCategory {
    ReadOnly,
    Mutation,
}

impl StatementCategory {
    /// Keywords a statement of this category may start with
    pub fn allowed_openers(self) -> &'static [&'static str] {
        match self {
            Self::ReadOnly => &["SELECT"],
            Self::Mutation => &["INSERT", "UPDATE", "DELETE"],
        }
    }

    fn opener(self) -> &'static Regex {
        match self {
            Self::ReadOnly => &SELECT_OPENER,
            Self::Mutation => &DML_OPENER,
        }
    }

    fn forbidden(self) -> &'static Regex {
        match self {
            Self::ReadOnly => &READ_ONLY_FORBIDDEN,
            Self::Mutation => &MUTATION_FORBIDDEN,
        }
    }
}

impl fmt::Display for StatementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => f.write_str("read-only"),
            Self::Mutation => f.write_str("mutation"),
        }
    }
}

/// Why a statement was refused. One variant per rule.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("empty statement")]
    Empty,

    #[error("{}", opener_message(.0))]
    WrongOpener(StatementCategory),

    #[error("{keyword} is not allowed in a {category} statement")]
    ForbiddenKeyword {
        category: StatementCategory,
        keyword: String,
    },

    #[error("procedure and dynamic SQL invocation is not allowed: {keyword}")]
    DangerousInvocation { keyword: String },

    #[error("comments not allowed: found '{marker}'")]
    Comment { marker: String },
}

fn opener_message(category: &StatementCategory) -> String {
    format!("only {} allowed", category.allowed_openers().join("/"))
}

/// Terminal outcome of validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(StatementCategory),
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    pub fn into_result(self) -> Result<StatementCategory, Rejection> {
        match self {
            Self::Accepted(category) => Ok(category),
            Self::Rejected(rejection) => Err(rejection),
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Classify `statement` against the declared `category`.
///
/// The verdict only gates execution; the statement text is never rewritten.
pub fn validate(statement: &str, category: StatementCategory) -> Verdict {
    match check(statement, category) {
        Ok(()) => {
            tracing::debug!(%category, statement = statement.trim(), "SQL validation passed");
            Verdict::Accepted(category)
        }
        Err(rejection) => {
            tracing::debug!(%category, reason = %rejection, "SQL validation rejected statement");
            Verdict::Rejected(rejection)
        }
    }
}

fn check(statement: &str, category: StatementCategory) -> Result<(), Rejection> {
    if statement.trim().is_empty() {
        return Err(Rejection::Empty);
    }

    if !category.opener().is_match(statement) {
        return Err(Rejection::WrongOpener(category));
    }

    if let Some(found) = category.forbidden().find(statement) {
        return Err(Rejection::ForbiddenKeyword {
            category,
            keyword: found.as_str().to_uppercase(),
        });
    }

    if let Some(found) = DANGEROUS_INVOCATION.find(statement) {
        return Err(Rejection::DangerousInvocation {
            keyword: found.as_str().to_uppercase(),
        });
    }

    if let Some(found) = COMMENT_MARKER.find(statement) {
        return Err(Rejection::Comment {
            marker: found.as_str().to_string(),
        });
    }

    Ok(())
}
