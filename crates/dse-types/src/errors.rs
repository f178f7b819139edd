use thiserror::Error;

/// Main error type for the hlsdse system
#[derive(Error, Debug)]
pub enum DseError {
    #[error("Expression error: {0}")]
    Expr(#[from] ExprError),

    #[error("Design space error: {0}")]
    Space(#[from] SpaceError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Interrupted by user")]
    Interrupted,
}

/// Expression parsing and evaluation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("Syntax error in `{expr}`: {message}")]
    Syntax { expr: String, message: String },

    #[error("Name `{name}` is not defined")]
    UndefinedName { name: String },

    #[error("Type error: {message}")]
    Type { message: String },

    #[error("{func}() takes {expected} argument(s) but {found} were given")]
    Arity {
        func: String,
        expected: String,
        found: usize,
    },

    #[error("Division by zero")]
    ZeroDivision,

    #[error("Math domain error in {func}(): {message}")]
    Domain { func: String, message: String },
}

/// Design space construction and validation errors
#[derive(Error, Debug)]
pub enum SpaceError {
    #[error("Missing attribute \"{attribute}\" in {id}")]
    MissingAttribute { id: String, attribute: String },

    #[error("Illegal option list of {id}: {expr} ({message})")]
    InvalidOptions {
        id: String,
        expr: String,
        message: String,
    },

    #[error("Redefined design parameter {id}")]
    Redefined { id: String },

    #[error("Design space has {errors} error(s)")]
    CheckFailed { errors: usize },

    #[error("Unknown design parameter {id}")]
    UnknownParameter { id: String },

    #[error("Options of {id} do not evaluate to a list of int or str: {expr}")]
    NonListOptions { id: String, expr: String },

    #[error("Failed to evaluate {id} ({expr}): {source}")]
    Evaluation {
        id: String,
        expr: String,
        #[source]
        source: ExprError,
    },
}

/// Search algorithm errors
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Unknown search algorithm: {name}")]
    UnknownAlgorithm { name: String },

    #[error("Batch size must be positive")]
    InvalidBatchSize,
}

/// Job and evaluation pipeline errors
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Cannot find any kernel files with auto markers under {path}")]
    NoMarkedSources { path: String },

    #[error("Job {key} is {found:?} but {expected:?} was required")]
    JobState {
        key: String,
        expected: crate::JobStatus,
        found: crate::JobStatus,
    },

    #[error("Cannot find the corresponding auto{{}} markers for {ids:?}")]
    UnmatchedParameters { ids: Vec<String> },

    #[error("Failed to create sandbox at {path}: {message}")]
    SandboxCreation { path: String, message: String },

    #[error("Failed to apply design point to {path}: {message}")]
    SandboxIo { path: String, message: String },
}

/// Result database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Corrupted entry {key}: {message}")]
    Corrupted { key: String, message: String },

    #[error("Failed to persist database to {path}: {message}")]
    PersistFailed { path: String, message: String },
}

pub type DseResult<T> = Result<T, DseError>;

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::DseError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::DseError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SpaceError::InvalidOptions {
            id: "A".to_string(),
            expr: "[x for".to_string(),
            message: "unexpected end".to_string(),
        };

        assert!(error.to_string().contains("A"));
        assert!(error.to_string().contains("[x for"));
    }

    #[test]
    fn test_error_conversion() {
        let expr_error = ExprError::UndefinedName {
            name: "sin".to_string(),
        };
        let dse_error: DseError = expr_error.into();

        match dse_error {
            DseError::Expr(ExprError::UndefinedName { name }) => assert_eq!(name, "sin"),
            _ => panic!("Expected Expr error"),
        }
    }

    #[test]
    fn test_macros() {
        assert!(matches!(internal_error!("Something went wrong"), DseError::Internal(_)));
        assert!(matches!(config_error!("Missing key: {}", "timeout"), DseError::Config(_)));
    }
}
