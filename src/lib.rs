//! Manual CoAP diagnostic client: issue a single GET, PUT, or DELETE against a
//! device and print the result.
//!
//! # Examples
//! ```no_run
//! use coap_probe::{Method, RequestRunner, Target, UdpTransport};
//!
//! #[tokio::main]
//! async fn main() {
//!     let runner = RequestRunner::new(UdpTransport::new());
//!     let target = Target::new("192.168.8.92", "nombre");
//!     runner.issue(&target, Method::Get, None).await;
//! }
//! ```

pub use coap_lite::RequestType as Method;
pub use error::ProbeError;
pub use request::{Outcome, Request, Response, Target};
pub use runner::RequestRunner;
pub use udp::UdpTransport;

pub mod error;
pub mod request;
pub mod runner;
pub mod transport;
pub mod udp;
