use records::{LocalizedTextError, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Malformed template, question data or submitted answer.
    #[error("{0}")]
    Validation(String),
    /// Constraints that cannot be satisfied (selection counts, exclusion rules, limits).
    #[error("{0}")]
    InvalidConfig(String),
    #[error("unknown question type '{0}'")]
    UnknownQuestionType(String),
    #[error("unknown locale '{0}'")]
    UnknownLocale(String),
    /// Dynamic question code did not produce a usable question.
    #[error("{0}")]
    Generation(String),
    /// Operation is not allowed in the current lifecycle state.
    #[error("{0}")]
    StateConflict(String),
    #[error("{0}")]
    NotFound(String),
    // Froms
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Regex(#[from] regex::Error),
}

impl From<LocalizedTextError> for Error {
    fn from(e: LocalizedTextError) -> Self {
        match e {
            LocalizedTextError::UnknownLocale(locale) => Error::UnknownLocale(locale),
            LocalizedTextError::Empty => Error::Validation(e.to_string()),
        }
    }
}

impl Error {
    /// Prefixes the message of the error, keeping its kind.
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        match self {
            Error::Validation(m) => Error::Validation(format!("{context}: {m}")),
            Error::InvalidConfig(m) => Error::InvalidConfig(format!("{context}: {m}")),
            Error::Generation(m) => Error::Generation(format!("{context}: {m}")),
            Error::StateConflict(m) => Error::StateConflict(format!("{context}: {m}")),
            Error::NotFound(m) => Error::NotFound(format!("{context}: {m}")),
            other => other,
        }
    }

    /// Message that may be shown to an end user. Internal details stay in the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::Validation(_) => "The submitted data are not valid.",
            Error::StateConflict(_) => "The operation is not allowed in the current state.",
            Error::NotFound(_) | Error::Store(StoreError::NotFound { .. }) => {
                "The requested record does not exist."
            }
            Error::Store(StoreError::Conflict { .. }) => {
                "The record already exists or was changed concurrently."
            }
            _ => "An internal error occurred, the operation was not completed.",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn internal_errors_do_not_leak() {
        let err = Error::Generation("line 3: undefined variable 'secret'".into());
        assert!(!err.user_message().contains("secret"));

        let err = Error::Store(StoreError::NotFound {
            collection: "Question",
            id: Uuid::nil(),
        });
        assert_eq!(err.user_message(), "The requested record does not exist.");
    }

    #[test]
    fn context_keeps_the_kind() {
        let err = Error::InvalidConfig("not enough questions".into()).context("group 2");
        assert!(matches!(&err, Error::InvalidConfig(m) if m == "group 2: not enough questions"));
        let err = Error::UnknownQuestionType("essay".into()).context("ignored");
        assert_eq!(err.to_string(), "unknown question type 'essay'");
    }

    #[test]
    fn localized_text_errors_map_to_kinds() {
        let err: Error = LocalizedTextError::UnknownLocale("de".into()).into();
        assert!(matches!(err, Error::UnknownLocale(l) if l == "de"));
    }
}
