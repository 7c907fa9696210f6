use std::fmt;

/// Every error this crate can produce. All are fatal to the in-progress
/// fetch — there is no retry at this layer; retries and fallback clients
/// are the caller's concern.
#[derive(Debug, thiserror::Error)]
pub enum SabrError {
    /// HTTP connect/read/write failure, a non-2xx status, or an empty body.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed UMP framing, a truncated payload, or a varint that
    /// overflows or runs past the end of the buffer.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A `SABR_ERROR` part sent by the server.
    #[error("SABR error: type={error_type:?} action={action} status_code={status_code:?}")]
    Sabr {
        error_type: Option<String>,
        action: i64,
        status_code: Option<i64>,
    },

    /// `STREAM_PROTECTION_STATUS == REQUIRED`: the server demands a valid
    /// `poToken` the caller didn't supply (or supplied an invalid one).
    #[error("attestation required: server rejected the stream without a valid poToken")]
    AttestationRequired,

    /// The loop ran to completion without writing a single byte. The
    /// output file is deleted before this is returned. Also covers a stall
    /// (five consecutive requests with no activity) that ends with zero
    /// bytes written; a stall with bytes already written is a clean success
    /// instead — see `driver.rs::run_loop`.
    #[error("stream produced no audio bytes")]
    EmptyStream,
}

impl SabrError {
    pub fn transport(msg: impl fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    pub fn protocol(msg: impl fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }
}
