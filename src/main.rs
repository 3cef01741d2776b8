use anyhow::Result;
use coap_probe::{Method, RequestRunner, Target, UdpTransport};
use log::info;

/// Static probe configuration.  Edit these values to point the probe at your device, then
/// re-run; the tool issues exactly one request per run.
struct ProbeConfig {
    host: &'static str,
    resource_path: &'static str,
    method: Method,
    /// Required for PUT, must stay `None` for GET and DELETE.
    payload: Option<&'static [u8]>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = ProbeConfig {
        host: "192.168.8.92",
        resource_path: "nombre",
        method: Method::Get,
        payload: None,
    };

    run(config).await
}

async fn run(config: ProbeConfig) -> Result<()> {
    let target = Target::new(config.host, config.resource_path);
    info!("Issuing {:?} to {}", config.method, target.uri());

    let runner = RequestRunner::new(UdpTransport::new());
    runner
        .issue(&target, config.method, config.payload.map(|payload| payload.to_vec()))
        .await;

    // Success and failure both print their own diagnostic; exit normally either way.
    Ok(())
}
