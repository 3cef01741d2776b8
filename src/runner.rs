use std::time::Duration;

use coap_lite::RequestType;
use log::debug;

use crate::error::ProbeError;
use crate::request::{Outcome, Request, Response, Target};
use crate::transport::{ClientContext, Transport};

/// Fixed delay applied before submitting mutating requests, allowing a target device time to
/// finish booting or re-joining its network after a prior operation.
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Primary client API: perform exactly one request/response cycle against a [`Target`] and
/// report the outcome.
pub struct RequestRunner<T> {
    transport: T,
}

impl<T: Transport> RequestRunner<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Issue one request and suspend until a response arrives or the transport fails.  Prints
    /// one human-readable outcome block to stdout.  Failures are never retried; re-run the
    /// tool for another attempt.
    pub async fn issue(
        &self,
        target: &Target,
        method: RequestType,
        payload: Option<Vec<u8>>,
    ) -> Outcome {
        let outcome = match self.try_issue(target, method, payload).await {
            Ok(response) => Outcome::Success(response),
            Err(e) => Outcome::Failure(e.to_string()),
        };
        println!("{}", format_outcome(&outcome));
        outcome
    }

    async fn try_issue(
        &self,
        target: &Target,
        method: RequestType,
        payload: Option<Vec<u8>>,
    ) -> Result<Response, ProbeError> {
        Request::check_preconditions(target, method, payload.as_deref())?;

        // Context lives to the end of this function on every path.
        let mut context = self.transport.open().await?;

        if matches!(method, RequestType::Put | RequestType::Delete) {
            debug!("Waiting {SETTLE_DELAY:?} for {} to settle...", target.host);
            tokio::time::sleep(SETTLE_DELAY).await;
        }

        let request = Request::build(target, method, payload)?;
        debug!("Submitting {:?} {}", request.method, request.uri);
        let response = context.submit(&request).await?;
        Ok(response)
    }
}

/// Render an outcome as the block printed after each run.
pub fn format_outcome(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Success(response) => format!(
            "Result: {:?}\n{}",
            response.status,
            String::from_utf8_lossy(&response.payload)
        ),
        Outcome::Failure(reason) => format!("Failed to fetch resource:\n{reason}"),
    }
}
