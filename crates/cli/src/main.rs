use clap::Parser;
use rtsp_client::{Client, ClientConfig, Status};
use std::io::{self, BufRead};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "rtsp-client",
    about = "RTSP client for MJPEG-over-RTP streams"
)]
struct Args {
    /// RTSP server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// RTSP server port
    #[arg(long, short, default_value_t = 8554)]
    port: u16,

    /// Local RTP port announced in SETUP (0 picks a free one)
    #[arg(long, default_value_t = 25000)]
    rtp_port: u16,

    /// Resource to request
    #[arg(long, short, default_value = "movie.Mjpeg")]
    resource: String,

    /// Directory for cache-<session>.jpg frame files (kept in memory if unset)
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> ClientConfig {
        ClientConfig {
            server_host: self.host,
            server_port: self.port,
            rtp_port: self.rtp_port,
            resource: self.resource,
            cache_dir: self.cache_dir,
            ..ClientConfig::default()
        }
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let config = Args::parse().into_config();
    let addr = config.server_addr();

    let client = match Client::connect(config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to connect to {}: {}", addr, e);
            return;
        }
    };

    client.on_status(|status| match status {
        Status::StateChanged { from, to } => println!("state: {:?} -> {:?}", from, to),
        Status::NotFound => println!("server: resource not found"),
        Status::ServerError => println!("server: connection error"),
        Status::Disconnected => println!("server closed the connection"),
        Status::MediaUnavailable(reason) => println!("media unavailable: {}", reason),
    });
    client.on_frame(|frame| {
        tracing::trace!(seq = frame.sequence, bytes = frame.data.len(), "frame");
    });

    println!("Connected to {}. Commands: setup, play, pause, teardown, stats, quit", addr);

    for line in io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        let result = match line.trim() {
            "" => continue,
            "setup" => client.setup(),
            "play" => client.play(),
            "pause" => client.pause(),
            "teardown" => client.teardown(),
            "stats" => {
                match client.media_stats() {
                    Some(stats) => println!(
                        "frames: {} forwarded, {} rejected, {} malformed, last seq {}",
                        stats.forwarded, stats.rejected, stats.malformed, stats.last_sequence
                    ),
                    None => println!("no media channel"),
                }
                Ok(())
            }
            "quit" | "exit" => break,
            other => {
                println!("unknown command: {}", other);
                Ok(())
            }
        };
        if let Err(e) = result {
            println!("error: {}", e);
        }
    }

    client.close();
}
