//! boxroute-call: route one call and print the reply.
//!
//! ```text
//! boxroute-call <box> <service> [routing-key] < request-body
//! ```
//!
//! ## Configuration
//! - BOXROUTE_CONFIG: Path to a YAML config file (optional)
//! - BOXROUTE__*: Overrides for individual settings, e.g.
//!   `BOXROUTE__CONSUL__ADDRESS=http://consul:8500`
//! - BOXROUTE_LOG: Log filter (default: info), written to stderr

use std::io::{Read, Write};

use bytes::Bytes;
use tracing::info;

use boxroute::config::Config;
use boxroute::discovery::DiscoveryRegistry;
use boxroute::router::{CallContext, Router};
use boxroute::utils::bootstrap::init_tracing;

const USAGE: &str = "usage: boxroute-call <box> <service> [routing-key] < body";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let (box_name, service) = match (args.next(), args.next()) {
        (Some(box_name), Some(service)) => (box_name, service),
        _ => return Err(USAGE.into()),
    };
    let routing_key = args.next().unwrap_or_default();

    let config = Config::load(None)?;
    let discovery = DiscoveryRegistry::with_defaults().build(&config)?;
    let router = Router::from_config(&config.router, discovery.as_ref()).await?;

    let mut body = Vec::new();
    std::io::stdin().read_to_end(&mut body)?;

    info!(
        box_name = %box_name,
        service = %service,
        routing_key = %routing_key,
        coordinator = %router.coordinator(),
        "Routing call"
    );

    let ctx = CallContext::with_timeout(config.router.call_timeout());
    let reply = router
        .call(&ctx, &box_name, &service, &routing_key, Bytes::from(body))
        .await?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&reply)?;
    stdout.flush()?;
    Ok(())
}
