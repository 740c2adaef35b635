use thiserror::Error;

/// Why a raw message could not become a [`Lead`](crate::domain::Lead).
///
/// Every variant is permanent: the message is acknowledged and discarded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidLead {
    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing sender email")]
    MissingEmail,

    #[error("invalid sender email '{email}': {details}")]
    InvalidEmail { email: String, details: String },
}

impl InvalidLead {
    /// Short machine-friendly reason used in log fields
    pub fn reason(&self) -> &'static str {
        match self {
            InvalidLead::MalformedJson(_) => "malformed_json",
            InvalidLead::NotAnObject => "not_an_object",
            InvalidLead::MissingEmail => "missing_email",
            InvalidLead::InvalidEmail { .. } => "invalid_email",
        }
    }
}

/// Outcome classes of a call to the contact store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContactStoreError {
    #[error("contact store reported a conflict: {body}")]
    Conflict { body: String },

    #[error("payload too large for contact store")]
    PayloadTooLarge,

    #[error("contact store rejected payload: {body}")]
    Validation { body: String },

    #[error("transient contact store failure (HTTP {status})")]
    Transient { status: u16 },

    #[error("network error talking to contact store: {0}")]
    Network(String),

    #[error("contact store failed with HTTP {status}: {body}")]
    Fatal { status: u16, body: String },
}

impl ContactStoreError {
    /// Classify a non-2xx response.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            409 => ContactStoreError::Conflict { body },
            413 => ContactStoreError::PayloadTooLarge,
            422 => ContactStoreError::Validation { body },
            s if is_transient_status(s) => ContactStoreError::Transient { status: s },
            s => ContactStoreError::Fatal { status: s, body },
        }
    }

    /// Whether waiting and redelivering may resolve the failure
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ContactStoreError::Transient { .. } | ContactStoreError::Network(_)
        )
    }

    /// HTTP status behind the error, when one was received
    pub fn status(&self) -> Option<u16> {
        match self {
            ContactStoreError::Conflict { .. } => Some(409),
            ContactStoreError::PayloadTooLarge => Some(413),
            ContactStoreError::Validation { .. } => Some(422),
            ContactStoreError::Transient { status } => Some(*status),
            ContactStoreError::Fatal { status, .. } => Some(*status),
            ContactStoreError::Network(_) => None,
        }
    }
}

/// Statuses that are retried by the HTTP client and requeued by the dispatcher.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}
