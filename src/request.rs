use coap_lite::{RequestType, ResponseType};

use crate::error::ProbeError;

/// Device resource a probe run is aimed at.  `host` is an IPv4/IPv6 literal (IPv6 in brackets)
/// or a hostname, optionally with a `:port`; `resource_path` is appended without a leading
/// slash to form the request URI.
#[derive(Debug, Clone)]
pub struct Target {
    pub host: String,
    pub resource_path: String,
}

impl Target {
    pub fn new(host: impl Into<String>, resource_path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            resource_path: resource_path.into(),
        }
    }

    /// Request URI, composed as exactly `coap://<host>/<resource_path>`.
    pub fn uri(&self) -> String {
        format!("coap://{}/{}", self.host, self.resource_path)
    }
}

/// One outbound request, constructed fresh per invocation and discarded after the matching
/// response or failure is produced.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: RequestType,
    pub uri: String,
    pub payload: Option<Vec<u8>>,
}

impl Request {
    /// Validate the method/payload/target combination without touching the network.  PUT
    /// requires a non-empty payload; GET and DELETE must not carry one.
    pub fn check_preconditions(
        target: &Target,
        method: RequestType,
        payload: Option<&[u8]>,
    ) -> Result<(), ProbeError> {
        if target.resource_path.is_empty() {
            return Err(ProbeError::Precondition(
                "resource path must not be empty".to_string(),
            ));
        }
        match method {
            RequestType::Put => match payload {
                Some(payload) if !payload.is_empty() => Ok(()),
                _ => Err(ProbeError::Precondition(
                    "PUT requires a non-empty payload".to_string(),
                )),
            },
            RequestType::Get | RequestType::Delete => {
                if payload.is_some() {
                    return Err(ProbeError::Precondition(format!(
                        "{method:?} must not carry a payload"
                    )));
                }
                Ok(())
            }
            other => Err(ProbeError::Precondition(format!(
                "unsupported method {other:?}"
            ))),
        }
    }

    pub fn build(
        target: &Target,
        method: RequestType,
        payload: Option<Vec<u8>>,
    ) -> Result<Self, ProbeError> {
        Self::check_preconditions(target, method, payload.as_deref())?;
        Ok(Self {
            method,
            uri: target.uri(),
            payload,
        })
    }
}

/// Reply to a submitted request, taken verbatim from the wire.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: ResponseType,
    pub payload: Vec<u8>,
}

/// Result of one request/response cycle.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success(Response),
    Failure(String),
}
