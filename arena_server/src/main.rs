// CLI entry point for the arena game server.
//
// Starts a standalone server hosting sessions of one game. Clients name the
// session they want in their `Hello`; the first client to name a session
// creates it. See `server.rs` for the networking architecture and
// `session.rs` for the per-session state.
//
// Usage:
//   arena [OPTIONS]
//     --port <PORT>              Listen port (default: 7878)
//     --bind <ADDR>              Bind address (default: 127.0.0.1)
//     --game <NAME>              Game to host (default: Nim)
//     --players <N>              Seats per session (default: 2)
//     --time-bank-ms <MS>        Starting time bank per seat (default: 10000)
//     --settings-json <JSON>     Full `GameSettings` as JSON (applied first)
//
// Logging goes through `tracing`; set `RUST_LOG` to change verbosity
// (default `info`).

use arena_core::GameSettings;
use arena_server::server::{ServerConfig, start_server};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = parse_args();
    let Some(factory) = arena_games::factory(&config.game) else {
        let known: Vec<String> = arena_games::factories()
            .iter()
            .map(|f| f.game_name().to_owned())
            .collect();
        eprintln!("Unknown game {:?}; available: {}", config.game, known.join(", "));
        std::process::exit(1);
    };

    let (handle, addr) = match start_server(config, factory) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Failed to start server: {e}");
            std::process::exit(1);
        }
    };
    println!("Arena listening on {addr}");

    // The process exits on SIGINT/SIGTERM; sessions are torn down with it.
    handle.wait();
}

/// Parse command-line arguments into a `ServerConfig`. Plain
/// `std::env::args()` matching, no CLI crate.
fn parse_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig::default();

    // Settings JSON is the base the individual flags override.
    if let Some(pos) = args.iter().position(|a| a == "--settings-json") {
        let json = args.get(pos + 1).unwrap_or_else(|| fail("--settings-json requires a value"));
        config.settings = serde_json::from_str::<GameSettings>(json)
            .unwrap_or_else(|e| fail(&format!("--settings-json: {e}")));
    }

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || {
            i += 1;
            args.get(i).cloned().unwrap_or_else(|| fail(&format!("{flag} requires a value")))
        };
        match flag {
            "--port" => config.port = parse(flag, &value()),
            "--bind" => config.bind_address = value(),
            "--game" => config.game = value(),
            "--players" => config.settings.required_players = parse(flag, &value()),
            "--time-bank-ms" => config.settings.time_bank_ms = parse(flag, &value()),
            "--settings-json" => {
                value();
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

    config
}

fn parse<T: std::str::FromStr>(flag: &str, value: &str) -> T {
    value
        .parse()
        .unwrap_or_else(|_| fail(&format!("{flag}: invalid value {value:?}")))
}

fn fail(msg: &str) -> ! {
    eprintln!("{msg}");
    std::process::exit(1);
}

fn print_usage() {
    println!("Usage: arena [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --port <PORT>              Listen port (default: 7878)");
    println!("  --bind <ADDR>              Bind address (default: 127.0.0.1)");
    println!("  --game <NAME>              Game to host (default: Nim)");
    println!("  --players <N>              Seats per session (default: 2)");
    println!("  --time-bank-ms <MS>        Starting time bank per seat (default: 10000)");
    println!("  --settings-json <JSON>     Full GameSettings as JSON");
    println!("  --help, -h                 Show this help");
}
