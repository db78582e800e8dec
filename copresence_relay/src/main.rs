// CLI entry point for the copresence relay.
//
// Starts a standalone relay that clients connect to over TCP (port P) and
// UDP (port P+1). Configuration comes from an optional JSON file, overridden
// by flags. See `server.rs` for the networking architecture.
//
// Usage:
//   relay [OPTIONS]
//     --url <URL>        Listen address, URL-like (default: https://localhost:7777)
//     --session <ID>     Fixed session id (default: generated per run)
//     --config <FILE>    JSON config file (flags override its values)

use std::path::Path;

use log::info;

use copresence_relay::config::RelayConfig;
use copresence_relay::server::start_relay;

fn main() {
    env_logger::init();

    let config = parse_args();

    let (handle, tcp_addr, udp_addr) = match start_relay(config) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Failed to start relay: {e}");
            std::process::exit(1);
        }
    };

    println!("Relay session {}", handle.session_id());
    println!("Reliable channel on {tcp_addr}, unreliable on {udp_addr}");
    println!("Press Ctrl+C to stop.");
    info!("relay up with {} clients", handle.client_count());

    // The process exits on SIGINT/SIGTERM by default; the relay holds no
    // state worth flushing, so there is nothing to tear down gracefully.
    loop {
        std::thread::sleep(std::time::Duration::from_secs(1));
    }
}

/// Parse command-line arguments into a `RelayConfig`. Plain `std::env::args`
/// matching, no argument-parsing dependency.
fn parse_args() -> RelayConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = RelayConfig::default();
    let mut url: Option<String> = None;
    let mut session: Option<String> = None;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--url" => {
                i += 1;
                url = args.get(i).cloned().or_else(|| {
                    eprintln!("--url requires a value");
                    std::process::exit(1);
                });
            }
            "--session" => {
                i += 1;
                session = args.get(i).cloned().or_else(|| {
                    eprintln!("--session requires a value");
                    std::process::exit(1);
                });
            }
            "--config" => {
                i += 1;
                let Some(path) = args.get(i) else {
                    eprintln!("--config requires a file path");
                    std::process::exit(1);
                };
                config = match RelayConfig::load(Path::new(path)) {
                    Ok(loaded) => loaded,
                    Err(e) => {
                        eprintln!("Failed to load config {path}: {e}");
                        std::process::exit(1);
                    }
                };
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    if let Some(url) = url {
        config.server_url = url;
    }
    if session.is_some() {
        config.session_id = session;
    }
    config
}

fn print_usage() {
    println!("Usage: relay [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --url <URL>        Listen address, URL-like (default: https://localhost:7777)");
    println!("  --session <ID>     Fixed session id (default: generated per run)");
    println!("  --config <FILE>    JSON config file (flags override its values)");
    println!("  --help, -h         Show this help");
}
