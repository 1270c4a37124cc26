use thiserror::Error;

/// Every failure the sync engine can report.
///
/// Variants carry owned strings rather than source errors so the type stays
/// `Clone`: a single connection attempt is shared by every caller awaiting it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    // ── Transport errors ─────────────────────────────────────────────────────
    #[error("Connection failed: {message}")]
    Connection { message: String },

    // ── REST errors ──────────────────────────────────────────────────────────
    #[error("Request to {endpoint} failed: {message}")]
    Request {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },

    // ── Timeline errors ──────────────────────────────────────────────────────
    #[error("No pending entry for temporary id '{temp_id}'")]
    ReconciliationConflict { temp_id: String },

    #[error("No conversation is open")]
    NoActiveConversation,

    #[error("Timeline for conversation '{conversation_id}' cannot {operation} while {phase}")]
    InvalidPhase {
        conversation_id: String,
        operation: &'static str,
        phase: String,
    },

    // ── Wire errors ──────────────────────────────────────────────────────────
    #[error("Failed to decode '{event}' payload: {message}")]
    Decode { event: String, message: String },

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("Field '{field_name}' exceeds max length of {max_length} (actual: {actual_length})")]
    FieldTooLong { field_name: String, max_length: usize, actual_length: usize },

    // ── Configuration errors ─────────────────────────────────────────────────
    #[error("Invalid configuration value for {key}: {message}")]
    Config { key: String, message: String },
}

impl SyncError {
    pub fn connection(message: impl Into<String>) -> Self {
        SyncError::Connection { message: message.into() }
    }

    pub fn request(endpoint: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        SyncError::Request { endpoint: endpoint.into(), status, message: message.into() }
    }

    pub fn decode(event: impl Into<String>, source: &serde_json::Error) -> Self {
        SyncError::Decode { event: event.into(), message: source.to_string() }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, SyncError::Connection { .. })
    }

    pub fn is_request(&self) -> bool {
        matches!(self, SyncError::Request { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, SyncError::EmptyField { .. } | SyncError::FieldTooLong { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::ReconciliationConflict { .. })
    }
}
