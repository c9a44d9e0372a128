//! Query safety validator.
//!
//! A lexical admission filter for untrusted (model-generated) SQL. It is not
//! a parser: it tokenizes just enough to ignore string literals, quoted
//! identifiers and comments, then checks the leading keyword, a denylist of
//! mutating keywords and statement separators. The text that gets executed
//! is always the caller's unmodified string.
//!
//! Backends disagree on where a literal or comment ends (backslash escapes,
//! `#` and `//` line comments), so the query is lexed under every
//! combination of those rules and must pass each one.
//!
//! Admission here is one layer. Backends should also run under read-only
//! roles where they support them; the local engine refuses DDL and DML on
//! its own.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::Result;
use crate::Connector;
use flashviz_core::ResultTable;

/// Keywords that mark a statement as mutating, DDL or DCL.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "UPDATE", "DELETE", "DROP", "INSERT", "CREATE", "ALTER", "TRUNCATE", "GRANT", "REVOKE",
    "EXEC", "EXECUTE", "MERGE", "REPLACE",
];

/// Why a query was refused. Terminal for that query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("query is empty")]
    Empty,

    #[error("only SELECT statements are permitted")]
    NotSelect,

    #[error("forbidden keyword: {0}")]
    ForbiddenKeyword(String),

    #[error("multiple statements are not permitted")]
    MultipleStatements,
}

/// Outcome of validation. Either the whole query is admitted or none of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub admitted: bool,
    pub reason: String,
}

impl From<std::result::Result<(), Rejection>> for Verdict {
    fn from(outcome: std::result::Result<(), Rejection>) -> Self {
        match outcome {
            Ok(()) => Verdict {
                admitted: true,
                reason: "query admitted".to_string(),
            },
            Err(rejection) => Verdict {
                admitted: false,
                reason: rejection.to_string(),
            },
        }
    }
}

/// Validate and report as a [`Verdict`].
pub fn validate_query(sql: &str) -> Verdict {
    check_query(sql).into()
}

/// Validate, returning the violated rule on refusal.
pub fn check_query(sql: &str) -> std::result::Result<(), Rejection> {
    let mut outcome = Ok(());
    for rules in LexRules::ALL {
        match check_tokens(&tokenize(sql, rules)) {
            Ok(()) => {}
            // A hidden statement or keyword outranks a plain leading-keyword miss.
            Err(Rejection::NotSelect) | Err(Rejection::Empty) if outcome.is_err() => {}
            Err(rejection) => {
                let decisive = !matches!(rejection, Rejection::NotSelect | Rejection::Empty);
                outcome = Err(rejection);
                if decisive {
                    break;
                }
            }
        }
    }
    outcome
}

fn check_tokens(tokens: &[Token]) -> std::result::Result<(), Rejection> {
    if tokens.is_empty() {
        return Err(Rejection::Empty);
    }

    // A lone trailing separator is fine; anything after one is another statement.
    if let Some(pos) = tokens.iter().position(|t| *t == Token::Separator) {
        if tokens[pos + 1..].iter().any(|t| *t != Token::Separator) {
            return Err(Rejection::MultipleStatements);
        }
    }

    let words: Vec<String> = tokens
        .iter()
        .filter_map(|t| match t {
            Token::Word(w) => Some(w.to_ascii_uppercase()),
            _ => None,
        })
        .collect();

    if let Some(keyword) = words
        .iter()
        .find(|w| FORBIDDEN_KEYWORDS.contains(&w.as_str()))
    {
        return Err(Rejection::ForbiddenKeyword(keyword.clone()));
    }

    let leading = match &tokens[0] {
        Token::Word(w) => w.to_ascii_uppercase(),
        _ => return Err(Rejection::NotSelect),
    };
    match leading.as_str() {
        "SELECT" => Ok(()),
        "WITH" if words.iter().skip(1).any(|w| w == "SELECT") => Ok(()),
        _ => Err(Rejection::NotSelect),
    }
}

/// Validate `sql`, then run it on `connector` only if admitted.
///
/// A refusal surfaces as `ConnectorError::ValidationRejected` and never
/// reaches the backend.
pub async fn run_guarded(connector: &mut dyn Connector, sql: &str) -> Result<ResultTable> {
    if let Err(rejection) = check_query(sql) {
        warn!("Rejected query for {}: {}", connector.kind(), rejection);
        return Err(rejection.into());
    }
    debug!("Admitted query for {}", connector.kind());
    connector.execute(sql).await
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Separator,
    /// Literals, quoted identifiers and punctuation.
    Other,
}

/// Where literals and comments end. Each backend follows one combination.
#[derive(Debug, Clone, Copy)]
struct LexRules {
    /// `\` escapes the next character inside quotes (BigQuery, Snowflake,
    /// Databricks).
    backslash_escapes: bool,
    /// `#` (BigQuery) and `//` (Snowflake) start line comments.
    extra_line_comments: bool,
}

impl LexRules {
    const ALL: [LexRules; 4] = [
        LexRules {
            backslash_escapes: false,
            extra_line_comments: false,
        },
        LexRules {
            backslash_escapes: true,
            extra_line_comments: false,
        },
        LexRules {
            backslash_escapes: false,
            extra_line_comments: true,
        },
        LexRules {
            backslash_escapes: true,
            extra_line_comments: true,
        },
    ];
}

fn tokenize(sql: &str, rules: LexRules) -> Vec<Token> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let line_comment = (c == '-' && chars.get(i + 1) == Some(&'-'))
            || (rules.extra_line_comments
                && (c == '#' || (c == '/' && chars.get(i + 1) == Some(&'/'))));
        match c {
            c if c.is_whitespace() => i += 1,
            '\'' | '"' | '`' => {
                i = skip_quoted(&chars, i, c, rules.backslash_escapes);
                tokens.push(Token::Other);
            }
            _ if line_comment => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
            }
            ';' => {
                tokens.push(Token::Separator);
                i += 1;
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            _ => {
                tokens.push(Token::Other);
                i += 1;
            }
        }
    }
    tokens
}

/// Skip a quoted run starting at `start`. A doubled quote is an escaped quote,
/// as is a backslash-prefixed one when `backslash_escapes` is set.
/// Returns the index after the closing quote, or the end of input.
fn skip_quoted(chars: &[char], start: usize, quote: char, backslash_escapes: bool) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if backslash_escapes && chars[i] == '\\' {
            i += 2;
            continue;
        }
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admitted(sql: &str) -> bool {
        validate_query(sql).admitted
    }

    #[test]
    fn admits_plain_select() {
        assert!(admitted("SELECT 1"));
        assert!(admitted("  select * from data"));
        assert!(admitted("SELECT * FROM data;"));
    }

    #[test]
    fn admits_cte() {
        assert!(admitted("WITH t AS (SELECT 1) SELECT * FROM t"));
        assert_eq!(check_query("WITH t AS (VALUES (1)) TABLE t"), Err(Rejection::NotSelect));
    }

    #[test]
    fn rejects_empty() {
        let verdict = validate_query("");
        assert!(!verdict.admitted);
        assert!(verdict.reason.contains("empty"));
        assert_eq!(check_query("   \n\t"), Err(Rejection::Empty));
        assert_eq!(check_query("-- nothing here"), Err(Rejection::Empty));
    }

    #[test]
    fn rejects_mutations_naming_keyword() {
        let verdict = validate_query("DROP TABLE data");
        assert!(!verdict.admitted);
        assert!(verdict.reason.contains("DROP"));

        let verdict = validate_query("UPDATE data SET x=1");
        assert!(!verdict.admitted);
        assert!(verdict.reason.contains("UPDATE"));

        assert_eq!(
            check_query("select * from data where id in (delete from t)"),
            Err(Rejection::ForbiddenKeyword("DELETE".to_string()))
        );
    }

    #[test]
    fn rejects_non_select_leading_keyword() {
        assert_eq!(check_query("SHOW TABLES"), Err(Rejection::NotSelect));
        assert_eq!(check_query("(SELECT 1)"), Err(Rejection::NotSelect));
        assert_eq!(check_query("WITH t AS (x) t"), Err(Rejection::NotSelect));
    }

    #[test]
    fn word_boundaries() {
        assert!(admitted("SELECT * FROM updates"));
        assert!(admitted("SELECT created_at, dropped FROM data"));
        assert!(admitted("SELECT region AS insert_region FROM data"));
    }

    #[test]
    fn literals_and_comments_are_ignored() {
        assert!(admitted("SELECT 'DROP TABLE x' AS note FROM data"));
        assert!(admitted("SELECT \"delete\" FROM data"));
        assert!(admitted("SELECT `update` FROM data"));
        assert!(admitted("SELECT 1 -- then DROP everything"));
        assert!(admitted("SELECT /* truncate */ 1"));
        assert!(admitted("SELECT 'it''s; fine' FROM data"));
    }

    #[test]
    fn rejects_stacked_statements() {
        assert_eq!(
            check_query("SELECT 1; SELECT 2"),
            Err(Rejection::MultipleStatements)
        );
        assert_eq!(
            check_query("SELECT 1; DROP TABLE data"),
            Err(Rejection::MultipleStatements)
        );
        assert!(admitted("SELECT 1;  "));
    }

    #[test]
    fn backslash_escaped_quote_cannot_hide_a_statement() {
        // Backends with backslash escapes read '\'' as one literal.
        assert_eq!(
            check_query("SELECT '\\'' ; DROP TABLE t; -- '"),
            Err(Rejection::MultipleStatements)
        );
        // Backends without them read '\' as the literal instead.
        assert_eq!(
            check_query("SELECT '\\' ; DROP TABLE t; -- '"),
            Err(Rejection::MultipleStatements)
        );
        assert!(admitted("SELECT 'it\\'s' AS note FROM data"));
        assert!(admitted("SELECT 'C:\\' AS dir FROM data"));
    }

    #[test]
    fn dialect_line_comments_cannot_hide_a_statement() {
        assert_eq!(
            check_query("SELECT 1 # '\n; DROP TABLE t"),
            Err(Rejection::MultipleStatements)
        );
        assert_eq!(
            check_query("SELECT 1 // '\n; DROP TABLE t"),
            Err(Rejection::MultipleStatements)
        );
        assert_eq!(
            check_query("SELECT 1 # ; DROP TABLE t"),
            Err(Rejection::MultipleStatements)
        );
        assert!(admitted("SELECT 1 # trailing note"));
        assert!(admitted("SELECT a / b FROM data"));
    }

    #[test]
    fn unterminated_literal_hides_nothing() {
        // An open literal swallows the rest; the leading SELECT still decides.
        assert!(admitted("SELECT 'open"));
        assert_eq!(check_query("DROP 'x"), Err(Rejection::ForbiddenKeyword("DROP".into())));
    }
}
