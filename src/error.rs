use serde::Serialize;
use sled::transaction::TransactionError;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage unavailable: {0}")]
    Dependency(String),
    #[error("computation failed: {0}")]
    Computation(String),
}

/// Wire shape of an error as handed to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl LedgerError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::NotFound { .. } => "NotFound",
            Self::Conflict(_) => "Conflict",
            Self::Dependency(_) => "DependencyFailure",
            Self::Computation(_) => "ComputationError",
        }
    }

    /// HTTP-equivalent status for the error kind.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound { .. } => 404,
            Self::Conflict(_) => 409,
            Self::Dependency(_) => 503,
            Self::Computation(_) => 500,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

impl From<sled::Error> for LedgerError {
    fn from(value: sled::Error) -> Self {
        Self::Dependency(value.to_string())
    }
}

impl From<minicbor::decode::Error> for LedgerError {
    fn from(value: minicbor::decode::Error) -> Self {
        Self::Dependency(format!("corrupt record: {value}"))
    }
}

impl From<minicbor::encode::Error<std::convert::Infallible>> for LedgerError {
    fn from(value: minicbor::encode::Error<std::convert::Infallible>) -> Self {
        Self::Dependency(format!("failed to encode record: {value}"))
    }
}

impl From<TransactionError<LedgerError>> for LedgerError {
    fn from(value: TransactionError<LedgerError>) -> Self {
        match value {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => err.into(),
        }
    }
}
