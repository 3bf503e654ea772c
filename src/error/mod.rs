use thiserror::Error;

/// Outcome of a failed persistence operation.
///
/// Driver errors never leave the store raw: unique violations become
/// `DuplicateName`/`DuplicateItem`, missing rows become `NotFound`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("a list with this name already exists")]
    DuplicateName,

    #[error("this title is already in the list")]
    DuplicateItem,

    #[error("database backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Backend(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(#[from] anyhow::Error),
}

impl StoreError {
    pub fn invalid(message: impl Into<String>) -> Self {
        StoreError::InvalidInput(message.into())
    }

    pub fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_user_presentable() {
        assert_eq!(StoreError::NotFound.to_string(), "record not found");
        assert_eq!(
            StoreError::invalid("PIN must be 4-6 digits").to_string(),
            "invalid input: PIN must be 4-6 digits"
        );
    }

    #[test]
    fn test_row_not_found_is_not_a_unique_violation() {
        assert!(!StoreError::is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
