use std::fmt;

use crate::error::{AppError, AppErrorKind, InfrastructureError};

/// Database error categories
#[derive(Debug, Clone)]
pub enum DatabaseErrorKind {
    /// Connection pool is exhausted
    PoolExhausted,
    /// Record not found
    NotFound { entity: String, id: String },
    /// Unique constraint violation (e.g., duplicate key)
    UniqueConstraintViolation { constraint: String },
    /// Foreign key constraint violation
    ForeignKeyViolation { constraint: String },
    /// Check constraint violation, e.g. an unknown status string
    CheckViolation { constraint: String },
    /// Query execution error
    QueryError { message: String },
    /// Row could not be decoded into its entity type
    DecodeError { message: String },
    /// Database connection error
    ConnectionError { message: String },
    /// Migration failure
    MigrationError { message: String },
    Unknown { message: String },
}

/// Result type for database operations
pub type DbResult<T> = Result<T, DatabaseError>;

#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
    pub context: Option<String>,
    pub is_retryable: bool,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        let is_retryable = matches!(
            kind,
            DatabaseErrorKind::PoolExhausted | DatabaseErrorKind::ConnectionError { .. }
        );

        Self {
            kind,
            context: None,
            is_retryable,
        }
    }

    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::NotFound { .. })
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueConstraintViolation { .. })
    }

    /// Map SQLx error to our custom error type
    pub fn from_sqlx(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Self::new(DatabaseErrorKind::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            }),
            sqlx::Error::PoolTimedOut => Self::new(DatabaseErrorKind::PoolExhausted),
            sqlx::Error::PoolClosed => Self::new(DatabaseErrorKind::ConnectionError {
                message: "Connection pool is closed".to_string(),
            }),
            sqlx::Error::Database(db_err) => {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                match db_err.code().as_deref() {
                    // Postgres SQLSTATE codes
                    Some("23505") => {
                        Self::new(DatabaseErrorKind::UniqueConstraintViolation { constraint })
                    }
                    Some("23503") => {
                        Self::new(DatabaseErrorKind::ForeignKeyViolation { constraint })
                    }
                    Some("23514") => Self::new(DatabaseErrorKind::CheckViolation { constraint }),
                    _ => Self::new(DatabaseErrorKind::QueryError {
                        message: db_err.message().to_string(),
                    }),
                }
            }
            sqlx::Error::ColumnDecode { index, source } => {
                Self::new(DatabaseErrorKind::DecodeError {
                    message: format!("column {}: {}", index, source),
                })
            }
            sqlx::Error::Decode(source) => Self::new(DatabaseErrorKind::DecodeError {
                message: source.to_string(),
            }),
            sqlx::Error::Io(io_err) => Self::new(DatabaseErrorKind::ConnectionError {
                message: io_err.to_string(),
            }),
            sqlx::Error::Migrate(err) => Self::new(DatabaseErrorKind::MigrationError {
                message: err.to_string(),
            }),
            other => Self::new(DatabaseErrorKind::Unknown {
                message: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DatabaseErrorKind::PoolExhausted => write!(f, "connection pool exhausted")?,
            DatabaseErrorKind::NotFound { entity, id } => write!(f, "{} '{}' not found", entity, id)?,
            DatabaseErrorKind::UniqueConstraintViolation { constraint } => {
                write!(f, "unique constraint '{}' violated", constraint)?
            }
            DatabaseErrorKind::ForeignKeyViolation { constraint } => {
                write!(f, "foreign key '{}' violated", constraint)?
            }
            DatabaseErrorKind::CheckViolation { constraint } => {
                write!(f, "check constraint '{}' violated", constraint)?
            }
            DatabaseErrorKind::QueryError { message } => write!(f, "query failed: {}", message)?,
            DatabaseErrorKind::DecodeError { message } => write!(f, "decode failed: {}", message)?,
            DatabaseErrorKind::ConnectionError { message } => {
                write!(f, "connection error: {}", message)?
            }
            DatabaseErrorKind::MigrationError { message } => {
                write!(f, "migration failed: {}", message)?
            }
            DatabaseErrorKind::Unknown { message } => write!(f, "database error: {}", message)?,
        }
        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }
        Ok(())
    }
}

impl std::error::Error for DatabaseError {}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.to_string(),
            is_retryable: err.is_retryable,
        }))
    }
}
