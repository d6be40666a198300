//! Error kinds raised by the verification engine.
//!
//! Each component has its own error enum. `ReviewError` is the review-session
//! boundary: everything below it collapses into one user-visible message plus
//! an optional machine code, and nothing here is allowed to take down the
//! hosting process.

use serde_json::Value;
use thiserror::Error;

/// Envelope could not be turned into a raw payload.
#[derive(Debug, Error)]
pub enum DecryptionError {
    #[error("no decryption key provisioned; pair a device first")]
    NoKey,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("decrypted buffer is not a valid payload: {0}")]
    Undecodable(String),

    #[error("payload encoding failed: {0}")]
    Encode(String),
}

/// A decoded payload is structurally present but semantically unusable.
#[derive(Debug, Error)]
pub enum PayloadValidationError {
    #[error("payload is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` is not a valid quantity: {value}")]
    InvalidQuantity { field: &'static str, value: String },

    #[error("field `{field}` is not valid hex data")]
    InvalidBytes { field: &'static str },

    #[error("request declared as `{declared}` but payload decodes as {decoded}")]
    KindMismatch {
        declared: String,
        decoded: &'static str,
    },

    #[error("unparseable creation date: {0}")]
    InvalidTimestamp(String),
}

/// Encoding or hashing of a normalized transaction failed.
#[derive(Debug, Error)]
pub enum HashComputationError {
    #[error("cannot encode field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("invalid Safe version `{0}`")]
    InvalidVersion(String),
}

/// Transport-level failure talking to a JSON-RPC endpoint.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    /// HTTP status when the server answered with a non-2xx response.
    pub status: Option<u16>,
}

/// Simulation could not produce a usable call result.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Network or HTTP failure. User-retryable.
    #[error("simulation request failed: {message}")]
    Request {
        message: String,
        code: Option<i64>,
        call_content: Value,
    },

    /// Top-level JSON-RPC error, per-call execution error or malformed response.
    #[error("simulation failed: {message}")]
    Protocol {
        message: String,
        code: Option<i64>,
        call_content: Value,
    },

    /// The trace contained no Transfer/Approval events involving the signer.
    #[error("no asset changes found in simulation")]
    NoChanges,
}

impl SimulationError {
    pub fn message(&self) -> String {
        match self {
            SimulationError::Request { message, .. }
            | SimulationError::Protocol { message, .. } => message.clone(),
            SimulationError::NoChanges => self.to_string(),
        }
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            SimulationError::Request { code, .. } | SimulationError::Protocol { code, .. } => *code,
            SimulationError::NoChanges => None,
        }
    }

    /// The exact call payload that was sent, kept for diagnostics.
    pub fn call_content(&self) -> Option<&Value> {
        match self {
            SimulationError::Request { call_content, .. }
            | SimulationError::Protocol { call_content, .. } => Some(call_content),
            SimulationError::NoChanges => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SimulationError::Request { .. })
    }
}

/// Token or chain metadata could not be resolved. Never fatal.
#[derive(Debug, Error)]
#[error("metadata unavailable for {address} on chain {chain_id}: {reason}")]
pub struct MetadataResolutionError {
    pub chain_id: String,
    pub address: String,
    pub reason: String,
}

/// Pairing and relay backend failures.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid pairing QR code: {0}")]
    InvalidQr(String),

    #[error("relay returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("relay request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Key(#[from] DecryptionError),
}

/// Everything that can end a single review session.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error(transparent)]
    Decryption(#[from] DecryptionError),

    #[error(transparent)]
    Payload(#[from] PayloadValidationError),

    #[error(transparent)]
    Hash(#[from] HashComputationError),

    #[error(transparent)]
    Simulation(#[from] SimulationError),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl ReviewError {
    /// Single message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ReviewError::Decryption(DecryptionError::NoKey) => {
                "This device is not paired. Scan the pairing QR code first.".into()
            }
            ReviewError::Decryption(_) => {
                "The transaction could not be decrypted. Try pairing again.".into()
            }
            ReviewError::Payload(e) => format!("The transaction request is invalid: {e}"),
            ReviewError::Hash(e) => format!("Could not compute verification hashes: {e}"),
            ReviewError::Simulation(e) if e.is_retryable() => {
                "The simulation node could not be reached. Pull to refresh.".into()
            }
            ReviewError::Simulation(e) => e.message(),
            ReviewError::Relay(e) => format!("Pairing failed: {e}"),
        }
    }

    /// Optional machine-readable code attached to the message.
    pub fn code(&self) -> Option<i64> {
        match self {
            ReviewError::Simulation(e) => e.code(),
            ReviewError::Relay(RelayError::Http { status, .. }) => Some(i64::from(*status)),
            _ => None,
        }
    }

    /// Stable kind label for logs and API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            ReviewError::Decryption(_) => "decryption",
            ReviewError::Payload(_) => "payload_validation",
            ReviewError::Hash(_) => "hash_computation",
            ReviewError::Simulation(SimulationError::Request { .. }) => "simulation_request",
            ReviewError::Simulation(SimulationError::Protocol { .. }) => "simulation_protocol",
            ReviewError::Simulation(SimulationError::NoChanges) => "no_changes",
            ReviewError::Relay(_) => "relay",
        }
    }
}
