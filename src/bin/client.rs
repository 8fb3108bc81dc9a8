//! BucketKV Client Binary
//!
//! Connects to a server, reads commands from stdin and prints every
//! notification as `(key,value)`. Exits as soon as the server closes the
//! session, even while waiting for input.

use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use bucketkv::client::{ClientCommand, ClientPaths, KvsClient};
use clap::Parser;
use crossbeam::channel::{bounded, select, Receiver};
use tracing_subscriber::{fmt, EnvFilter};

/// BucketKV Client
#[derive(Parser, Debug)]
#[command(name = "bucketkv-client")]
#[command(about = "Subscribe to BucketKV key changes")]
struct Args {
    /// Unique id used to name this client's FIFOs
    client_id: String,

    /// Server registration FIFO
    registry_path: PathBuf,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args = Args::parse();
    let paths = ClientPaths::for_id(&args.client_id);

    let mut client = match KvsClient::connect(&args.registry_path, paths, |key, value| {
        println!("({},{})", key, value);
    }) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("Failed to connect to the server: {}", e);
            std::process::exit(1);
        }
    };
    println!("Connected to server");

    let lines = match spawn_stdin_reader() {
        Ok(lines) => lines,
        Err(e) => {
            tracing::error!("Failed to start the input reader: {}", e);
            client.abandon();
            std::process::exit(1);
        }
    };
    let closed = client.closed_signal();

    loop {
        let line = select! {
            recv(closed) -> _ => {
                tracing::info!("Server closed the session");
                client.abandon();
                return;
            }
            recv(lines) -> line => line,
        };
        let line = match line {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => {
                tracing::error!("Failed to read stdin: {}", e);
                break;
            }
            // end of input behaves like DISCONNECT
            Err(_) => break,
        };

        let command = match ClientCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("Invalid command. See HELP for usage ({})", e);
                continue;
            }
        };

        match command {
            ClientCommand::Subscribe(key) => match client.subscribe(&key) {
                Ok(existed) => println!("Server returned {} for operation: subscribe", existed as u8),
                Err(e) => tracing::error!("Command subscribe failed: {}", e),
            },
            ClientCommand::Unsubscribe(key) => match client.unsubscribe(&key) {
                Ok(removed) => {
                    println!("Server returned {} for operation: unsubscribe", (!removed) as u8)
                }
                Err(e) => tracing::error!("Command unsubscribe failed: {}", e),
            },
            ClientCommand::Delay(ms) => {
                if ms > 0 {
                    println!("Waiting...");
                    select! {
                        recv(closed) -> _ => {
                            tracing::info!("Server closed the session");
                            client.abandon();
                            return;
                        }
                        default(Duration::from_millis(ms)) => {}
                    }
                }
            }
            ClientCommand::Disconnect => break,
        }
    }

    match client.disconnect() {
        Ok(()) => println!("Disconnected from server"),
        Err(e) => {
            tracing::error!("Failed to disconnect from the server: {}", e);
            std::process::exit(1);
        }
    }
}

/// Forward stdin lines from a detached thread
///
/// The channel disconnects at end of input. The thread is never joined, so
/// a client closed by the server can exit while it blocks in a read.
fn spawn_stdin_reader() -> std::io::Result<Receiver<std::io::Result<String>>> {
    let (tx, rx) = bounded(0);
    std::thread::Builder::new()
        .name("kvs-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                if tx.send(line).is_err() {
                    return;
                }
            }
        })?;
    Ok(rx)
}
