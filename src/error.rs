use crate::ledger::LedgerError;
use crate::swap::SwapStatus;
use sled::transaction::TransactionError;

pub type Result<T, E = MarketError> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum MarketError {
    #[error("{message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    /// A business rule refused the request: the listing is not available, the
    /// actor tried to swap with themselves, the offer is outside the band...
    #[error("{0}")]
    Rule(String),
    #[error("Cannot {event} a swap that is {from}")]
    InvalidTransition {
        from: SwapStatus,
        event: &'static str,
    },
    #[error("{0}")]
    Conflict(String),
    #[error("Insufficient points: {needed} required, {available} available")]
    InsufficientPoints { needed: u64, available: u64 },
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{entity} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("failed to encode document: {0}")]
    Encoding(String),
    #[error("failed to decode document: {0}")]
    Decoding(#[from] minicbor::decode::Error),
    #[error("document is corrupted: {0}")]
    Corrupted(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// How the request boundary should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    State,
    Unauthenticated,
    Forbidden,
    NotFound,
    Internal,
}

impl MarketError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
    pub fn rule(message: impl Into<String>) -> Self {
        Self::Rule(message.into())
    }
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Rule(_)
            | Self::InvalidTransition { .. }
            | Self::Conflict(_)
            | Self::InsufficientPoints { .. } => ErrorKind::State,
            Self::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Storage(_)
            | Self::Encoding(_)
            | Self::Decoding(_)
            | Self::Corrupted(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status the REST surface answers with.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::State => 400,
            ErrorKind::Unauthenticated => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Internal => 500,
        }
    }

    /// The `message` shown to callers. Internal details never leave the process;
    /// they are logged here instead.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => {
                tracing::error!(error = %self, "internal error reached the request boundary");
                "Something went wrong".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl From<minicbor::encode::Error<std::convert::Infallible>> for MarketError {
    fn from(value: minicbor::encode::Error<std::convert::Infallible>) -> Self {
        Self::Encoding(value.to_string())
    }
}

impl From<LedgerError> for MarketError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::InsufficientFunds { needed, available }
            | LedgerError::InsufficientHeld {
                needed,
                held: available,
            } => Self::InsufficientPoints { needed, available },
            LedgerError::Overflow => Self::Internal(anyhow::anyhow!(value)),
        }
    }
}

impl From<TransactionError<MarketError>> for MarketError {
    fn from(value: TransactionError<MarketError>) -> Self {
        match value {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => Self::Storage(err),
        }
    }
}
