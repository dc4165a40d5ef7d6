use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Why a query produced no result.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error("connection failed: {0}")]
    ConnectionFailure(String),
    #[error("Query timed out")]
    Timeout,
    #[error("Query cancelled")]
    Cancelled,
    #[error("{message}")]
    Backend {
        /// SQLSTATE for PostgreSQL, status code (e.g. `Neo.ClientError.Statement.SyntaxError`) for Neo4j.
        code: Option<String>,
        message: String,
        detail: Option<Box<StructuredError>>,
    },
    #[error("graph '{0}' not found")]
    SchemaNotFound(String),
    #[error("No active connection")]
    NoActiveConnection,
}

impl QueryError {
    pub fn backend(code: Option<String>, message: impl Into<String>) -> Self {
        QueryError::Backend {
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn from_pg_error(err: &tokio_postgres::Error, query: &str) -> Self {
        let structured = StructuredError::from_pg_error(err, query);
        QueryError::Backend {
            code: (!structured.code.is_empty()).then(|| structured.code.clone()),
            message: structured.message.clone(),
            detail: Some(Box::new(structured)),
        }
    }

    pub fn from_neo4j_error(err: &neo4rs::Error) -> Self {
        match err {
            neo4rs::Error::Neo4j(e) => QueryError::backend(Some(e.code().to_string()), e.message()),
            neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError => {
                QueryError::ConnectionFailure(err.to_string())
            }
            other => QueryError::backend(None, other.to_string()),
        }
    }

    /// Short machine-readable code shown next to the message.
    pub fn code(&self) -> Option<&str> {
        match self {
            QueryError::ConnectionFailure(_) => Some("CONNECTION"),
            QueryError::Timeout => Some("TIMEOUT"),
            QueryError::Cancelled => Some("CANCELLED"),
            QueryError::Backend { code, .. } => code.as_deref(),
            QueryError::SchemaNotFound(_) => Some("SCHEMA_NOT_FOUND"),
            QueryError::NoActiveConnection => Some("NO_CONNECTION"),
        }
    }

    /// Rich multi-line rendering when backend detail is available.
    pub fn display_full(&self) -> String {
        match self {
            QueryError::Backend {
                detail: Some(detail),
                ..
            } => detail.display_full(),
            QueryError::Backend {
                code: Some(code),
                message,
                ..
            } => format!("{}\n  Code: {}", message, code),
            other => other.to_string(),
        }
    }
}

impl From<anyhow::Error> for QueryError {
    fn from(err: anyhow::Error) -> Self {
        QueryError::ConnectionFailure(format!("{:#}", err))
    }
}

/// Categorized error types for SQL query failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorCategory {
    /// Syntax errors (SQLSTATE class 42 - syntax_error, etc.)
    Syntax,
    /// Semantic errors (missing table/column, ambiguous reference)
    Semantic,
    /// Execution/runtime errors (division by zero, constraint violation)
    Execution,
    /// Transaction state errors (e.g., transaction aborted)
    Transaction,
    /// Connection/communication errors
    Connection,
    /// Unknown or unclassified errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "Syntax Error"),
            ErrorCategory::Semantic => write!(f, "Semantic Error"),
            ErrorCategory::Execution => write!(f, "Execution Error"),
            ErrorCategory::Transaction => write!(f, "Transaction Error"),
            ErrorCategory::Connection => write!(f, "Connection Error"),
            ErrorCategory::Unknown => write!(f, "Error"),
        }
    }
}

/// Structured error with rich context from PostgreSQL error responses.
#[derive(Debug, Clone)]
pub struct StructuredError {
    pub category: ErrorCategory,
    /// PostgreSQL severity (ERROR, FATAL, etc.)
    pub severity: String,
    /// SQLSTATE error code (e.g., "42601" for syntax_error)
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// Character position in the query where the error occurred (1-based byte offset)
    pub position: Option<u32>,
    /// Context/traceback (e.g., PL/pgSQL call stack)
    pub where_: Option<String>,
    /// Computed line number (1-based) from position, if available
    pub line: Option<usize>,
    /// Computed column number (1-based) from position, if available
    pub col: Option<usize>,
}

impl StructuredError {
    /// Create a StructuredError from a tokio_postgres error, using the query text
    /// to compute line/column from the byte position.
    pub fn from_pg_error(err: &tokio_postgres::Error, query: &str) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let code_str = db_err.code().code().to_string();
            let category = categorize(&code_str, db_err.message());
            let position = db_err.position().and_then(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos),
                tokio_postgres::error::ErrorPosition::Internal { .. } => None,
            });

            let (line, col) = if let Some(pos) = position {
                byte_offset_to_line_col(query, pos as usize)
            } else {
                (None, None)
            };

            StructuredError {
                category,
                severity: db_err.severity().to_string(),
                code: code_str.clone(),
                message: db_err.message().to_string(),
                detail: db_err.detail().map(|s| s.to_string()),
                hint: db_err
                    .hint()
                    .map(|s| s.to_string())
                    .or_else(|| age_hint(&code_str, db_err.message()).map(str::to_string)),
                position,
                where_: db_err.where_().map(|s| s.to_string()),
                line,
                col,
            }
        } else {
            // Non-database error (connection, protocol, etc.)
            let category = if err.source().is_some() {
                ErrorCategory::Connection
            } else {
                ErrorCategory::Unknown
            };
            StructuredError {
                category,
                severity: "ERROR".to_string(),
                code: String::new(),
                message: err.to_string(),
                detail: err.source().map(|e| e.to_string()),
                hint: None,
                position: None,
                where_: None,
                line: None,
                col: None,
            }
        }
    }

    /// Format as a rich multi-line string.
    pub fn display_full(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("{}: {}", self.category, self.message));

        if let (Some(line), Some(col)) = (self.line, self.col) {
            lines.push(format!("  at line {}, column {}", line, col));
        }

        if !self.code.is_empty() {
            lines.push(format!("  SQLSTATE: {}", self.code));
        }

        if let Some(detail) = &self.detail {
            lines.push(format!("  Detail: {}", detail));
        }

        if let Some(hint) = &self.hint {
            lines.push(format!("  Hint: {}", hint));
        }

        if let Some(where_) = &self.where_ {
            lines.push(format!("  Context: {}", where_));
        }

        lines.join("\n")
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Convert a 1-based byte offset in a query string to (line, column) both 1-based.
fn byte_offset_to_line_col(query: &str, byte_pos: usize) -> (Option<usize>, Option<usize>) {
    if byte_pos == 0 || query.is_empty() {
        return (Some(1), Some(1));
    }
    let target = (byte_pos - 1).min(query.len()); // PostgreSQL positions are 1-based
    let mut line = 1usize;
    let mut col = 1usize;
    for (i, ch) in query.char_indices() {
        if i >= target {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (Some(line), Some(col))
}

/// Categorize a SQLSTATE code into an ErrorCategory.
fn categorize_sqlstate(code: &str) -> ErrorCategory {
    if code.len() < 2 {
        return ErrorCategory::Unknown;
    }
    match &code[..2] {
        "42" => {
            if code == "42601" || code == "42000" {
                ErrorCategory::Syntax
            } else {
                // 42P01 = undefined_table, 42703 = undefined_column, etc.
                ErrorCategory::Semantic
            }
        }
        // 3F000 is what AGE raises for an unknown graph
        "3F" => ErrorCategory::Semantic,
        "22" | "23" => ErrorCategory::Execution,
        "25" | "40" => ErrorCategory::Transaction,
        "08" => ErrorCategory::Connection,
        "53" | "54" | "55" | "57" => ErrorCategory::Execution,
        _ => ErrorCategory::Unknown,
    }
}

/// AGE raises many cypher failures as internal_error (XX000); the message
/// is the only thing telling a parse error from a missing label.
fn categorize(code: &str, message: &str) -> ErrorCategory {
    if code != "XX000" {
        return categorize_sqlstate(code);
    }
    let message = message.to_ascii_lowercase();
    if message.contains("syntax error") || message.contains("unexpected") {
        ErrorCategory::Syntax
    } else if message.contains("does not exist") || message.contains("could not find") {
        ErrorCategory::Semantic
    } else {
        ErrorCategory::Unknown
    }
}

fn age_hint(code: &str, message: &str) -> Option<&'static str> {
    match code {
        "42883" if message.contains("cypher") => {
            Some("Is the AGE extension installed? Run CREATE EXTENSION age.")
        }
        "3F000" => Some("Create the graph with SELECT create_graph('<name>')."),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(QueryError::Timeout.code(), Some("TIMEOUT"));
        assert_eq!(QueryError::Cancelled.code(), Some("CANCELLED"));
        assert_eq!(
            QueryError::backend(Some("42601".into()), "boom").code(),
            Some("42601")
        );
        assert_eq!(QueryError::backend(None, "boom").code(), None);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(QueryError::Timeout.to_string(), "Query timed out");
        assert_eq!(QueryError::Cancelled.to_string(), "Query cancelled");
        assert_eq!(
            QueryError::SchemaNotFound("movies".into()).to_string(),
            "graph 'movies' not found"
        );
    }

    #[test]
    fn test_display_full_with_code() {
        let err = QueryError::backend(Some("Neo.ClientError.Statement.SyntaxError".into()), "bad");
        let full = err.display_full();
        assert!(full.starts_with("bad"));
        assert!(full.contains("Neo.ClientError.Statement.SyntaxError"));
    }

    #[test]
    fn test_structured_error_display_full() {
        let err = StructuredError {
            category: ErrorCategory::Syntax,
            severity: "ERROR".to_string(),
            code: "42601".to_string(),
            message: "syntax error at or near \",\"".to_string(),
            detail: None,
            hint: Some("Remove trailing comma.".to_string()),
            position: Some(45),
            where_: None,
            line: Some(3),
            col: Some(1),
        };
        let full = err.display_full();
        assert!(full.contains("Syntax Error"));
        assert!(full.contains("at line 3, column 1"));
        assert!(full.contains("42601"));
        assert!(full.contains("Remove trailing comma"));
    }

    #[test]
    fn test_byte_offset_to_line_col() {
        let query = "SELECT *\nFROM users\nWHERE id = 1";
        assert_eq!(byte_offset_to_line_col(query, 1), (Some(1), Some(1)));
        assert_eq!(byte_offset_to_line_col(query, 10), (Some(2), Some(1)));
        assert_eq!(byte_offset_to_line_col(query, 21), (Some(3), Some(1)));
    }

    #[test]
    fn test_categorize_sqlstate() {
        assert_eq!(categorize_sqlstate("42601"), ErrorCategory::Syntax);
        assert_eq!(categorize_sqlstate("42P01"), ErrorCategory::Semantic);
        assert_eq!(categorize_sqlstate("23505"), ErrorCategory::Execution);
        assert_eq!(categorize_sqlstate("57014"), ErrorCategory::Execution);
        assert_eq!(categorize_sqlstate("25001"), ErrorCategory::Transaction);
        assert_eq!(categorize_sqlstate("08006"), ErrorCategory::Connection);
        assert_eq!(categorize_sqlstate("3F000"), ErrorCategory::Semantic);
        assert_eq!(categorize_sqlstate("XX000"), ErrorCategory::Unknown);
    }

    #[test]
    fn test_age_internal_errors_use_message() {
        assert_eq!(
            categorize("XX000", "syntax error at or near \"RETRUN\""),
            ErrorCategory::Syntax
        );
        assert_eq!(
            categorize("XX000", "label \"Persn\" does not exist"),
            ErrorCategory::Semantic
        );
        assert_eq!(
            categorize("XX000", "could not find rte for m"),
            ErrorCategory::Semantic
        );
        assert_eq!(categorize("XX000", "out of cheese"), ErrorCategory::Unknown);
        // Only XX000 is reinterpreted.
        assert_eq!(categorize("42P01", "syntax error"), ErrorCategory::Semantic);
    }

    #[test]
    fn test_age_hints() {
        assert!(age_hint("42883", "function cypher(unknown, unknown) does not exist")
            .unwrap()
            .contains("CREATE EXTENSION age"));
        assert!(age_hint("3F000", "graph \"movies\" does not exist").is_some());
        assert!(age_hint("42883", "function foo() does not exist").is_none());
        assert!(age_hint("42601", "syntax error").is_none());
    }
}
