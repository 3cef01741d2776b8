use crate::transport::TransportError;

/// Errors that end a single request cycle.  All of these are caught at the top of the cycle and
/// converted to a printed diagnostic; none propagate as an unhandled fault.
#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
    /// Invalid combination of method, payload, or target, caught before any network activity.
    #[error("{0}")]
    Precondition(String),

    /// The transport failed to deliver the request or produce a reply.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The reply arrived but was not usable as a response.
    #[error("protocol error: {0}")]
    Protocol(String),
}
