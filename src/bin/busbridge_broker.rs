//! busbridge-broker: standalone event broker
//!
//! Serves `ServerService.Register` on the configured address and publishes
//! events read from stdin on its local bus, pushing them to every subscribed
//! client.
//!
//! ## Input
//! One event per line: `<topic> <json array of arguments>`, e.g.
//! ```text
//! orders ["created", {"id": 7}]
//! heartbeat
//! ```
//! A missing argument list publishes with no arguments.
//!
//! ## Configuration
//! - First CLI argument: YAML config file (optional)
//! - BUSBRIDGE_CONFIG: YAML config file (optional)
//! - BUSBRIDGE__SERVER__ADDRESS, BUSBRIDGE__SERVER__PATH, ...: overrides
//! - BUSBRIDGE_LOG: tracing filter (default: info)

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use busbridge::bus::LocalBus;
use busbridge::config::Config;
use busbridge::protocol::EventArgs;
use busbridge::server::Server;
use busbridge::utils::bootstrap::init_tracing;

#[derive(Debug, thiserror::Error)]
enum LineError {
    #[error("arguments are not a JSON array: {0}")]
    Args(#[from] serde_json::Error),
}

/// Parse one input line. Blank lines yield `None`.
fn parse_line(line: &str) -> Result<Option<(String, EventArgs)>, LineError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (topic, rest) = match line.split_once(char::is_whitespace) {
        Some((topic, rest)) => (topic, rest.trim()),
        None => (line, ""),
    };
    let args = if rest.is_empty() {
        EventArgs::new()
    } else {
        serde_json::from_str(rest)?
    };

    Ok(Some((topic.to_string(), args)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;

    let bus = Arc::new(LocalBus::new());
    let server = Server::from_config(&config, bus);
    server.start().await?;

    info!(
        address = %server.address(),
        path = %server.path(),
        "busbridge-broker started, reading events from stdin"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("End of input");
                    break;
                };
                match parse_line(&line) {
                    Ok(Some((topic, args))) => {
                        let result = server.publish(&topic, args).await;
                        info!(
                            topic = %topic,
                            handled = result.handled,
                            failed = result.failed,
                            "Published"
                        );
                    }
                    Ok(None) => {}
                    Err(e) => warn!(line = %line, error = %e, "Skipping malformed line"),
                }
            }
        }
    }

    info!("Shutting down broker");
    server.stop().await;
    Ok(())
}
