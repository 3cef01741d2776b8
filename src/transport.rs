use std::io;

use async_trait::async_trait;
use coap_lite::error::MessageError;

use crate::request::{Request, Response};

/// Generalization of the underlying CoAP client capability, intended primarily to make it easy
/// to substitute alternative protocols (TCP, DTLS, etc) as well as canned implementations for
/// testing the request cycle without a network.
#[async_trait]
pub trait Transport {
    type Context: ClientContext;

    /// Acquire a client communication context.  The context is a scoped resource: it is opened
    /// once per request cycle and released by dropping it when the cycle completes, whether or
    /// not the request succeeded.
    async fn open(&self) -> Result<Self::Context, TransportError>;
}

/// An open communication channel capable of submitting a request and receiving the matching
/// response.
#[async_trait]
pub trait ClientContext: Send {
    /// Perform exactly one request/response cycle: submit the request and suspend until either
    /// a response arrives or the transport signals failure.  Submission is never retried here.
    async fn submit(&mut self, request: &Request) -> Result<Response, TransportError>;
}

/// Generalized errors indicating a range of transport-related issues such as being unable to
/// bind, unreachable hosts, malformed replies, etc.  All of these end one request cycle; none
/// are fatal to the process.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("generic I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("timeout waiting for a response")]
    Timeout,

    #[error("packet was malformed")]
    MalformedPacket(#[from] MessageError),

    #[error("unspecified: {0}")]
    Unspecified(String),
}
