//! sensor_sim: a stand-in for the field sensor
//!
//! Connects to a telemetry-relay server and behaves like the device firmware:
//! - idles until the server sends `start`
//! - streams one JSON reading per interval until the server sends `stop`
//! - on disconnect or connect failure, retries after a fixed delay

use clap::Parser;
use rand::Rng;
use serde::Serialize;
use std::f64::consts::PI;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Samples in one period of the simulated acceleration waveforms
const WAVE_PERIOD: u32 = 2000;

/// Command-line arguments for the simulator
#[derive(Parser, Debug)]
#[command(name = "sensor_sim")]
#[command(version = "0.1.0")]
#[command(about = "Simulated sensor for telemetry-relay", long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short, long, default_value = "127.0.0.1:1234")]
    server: String,

    /// Milliseconds between readings while streaming
    #[arg(short, long, default_value_t = 100)]
    interval_ms: u64,

    /// Seconds to wait before reconnecting
    #[arg(long, default_value_t = 3)]
    retry_secs: u64,

    /// Terminate each reading with a newline (for `--framing newline`)
    #[arg(long)]
    newline: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// One simulated reading, in the firmware's field order
#[derive(Debug, Serialize)]
struct Reading {
    acc_x: f64,
    acc_y: f64,
    acc_z: f64,
    temp: f64,
    hum: f64,
    pres: f64,
    co: f64,
    batt: u32,
    amp_x: f64,
    frec_x: f64,
    amp_y: f64,
    frec_y: f64,
    amp_z: f64,
    frec_z: f64,
}

/// Produces readings; acceleration follows a sine/cosine cycle, the rest is
/// uniform noise within the firmware's ranges.
struct Simulator {
    sample: u32,
}

impl Simulator {
    fn new() -> Self {
        Simulator { sample: 0 }
    }

    fn next_reading<R: Rng>(&mut self, rng: &mut R) -> Reading {
        if self.sample >= WAVE_PERIOD {
            self.sample = 0;
        }
        let phase = 2.0 * PI * 0.001 * f64::from(self.sample);
        self.sample += 1;

        Reading {
            acc_x: round(2.0 * phase.sin(), 2),
            acc_y: round(3.0 * phase.cos(), 2),
            acc_z: round(10.0 * phase.sin(), 2),
            temp: round(rng.gen_range(5.0..=30.0), 2),
            hum: round(rng.gen_range(30.0..=80.0), 2),
            pres: round(rng.gen_range(1000.0..=1200.0), 2),
            co: round(rng.gen_range(30.0..=200.0), 2),
            batt: rng.gen_range(1..=100),
            amp_x: round(rng.gen_range(0.0059..=0.12), 4),
            frec_x: round(rng.gen_range(29.0..=31.0), 2),
            amp_y: round(rng.gen_range(0.0041..=0.11), 4),
            frec_y: round(rng.gen_range(59.0..=61.0), 2),
            amp_z: round(rng.gen_range(0.008..=0.15), 4),
            frec_z: round(rng.gen_range(89.0..=91.0), 2),
        }
    }
}

fn round(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// Server instruction as seen by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Instruction {
    Start,
    Stop,
}

fn parse_instruction(bytes: &[u8]) -> Option<Instruction> {
    match bytes {
        b"start" => Some(Instruction::Start),
        b"stop" => Some(Instruction::Stop),
        _ => None,
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut simulator = Simulator::new();
    loop {
        info!(server = %args.server, "Connecting to server");
        match TcpStream::connect(&args.server).await {
            Ok(stream) => {
                info!("Connected to server");
                if let Err(e) = stream_session(stream, &mut simulator, &args).await {
                    warn!(error = %e, "Connection error");
                }
                info!(retry_secs = args.retry_secs, "Disconnected from server");
            }
            Err(e) => warn!(error = %e, "Failed to connect"),
        }
        tokio::time::sleep(Duration::from_secs(args.retry_secs)).await;
    }
}

/// Serve one connection; returns when the server closes it.
async fn stream_session(
    mut stream: TcpStream,
    simulator: &mut Simulator,
    args: &Args,
) -> std::io::Result<()> {
    let mut buffer = [0u8; 128];
    let mut sending = false;
    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));

    loop {
        tokio::select! {
            read = stream.read(&mut buffer) => {
                let n = read?;
                if n == 0 {
                    info!("Connection closed by server");
                    return Ok(());
                }
                match parse_instruction(&buffer[..n]) {
                    Some(Instruction::Start) => {
                        info!("Starting data transmission");
                        sending = true;
                        ticker.reset();
                    }
                    Some(Instruction::Stop) => {
                        info!("Stopping data transmission");
                        sending = false;
                    }
                    None => debug!(received = %String::from_utf8_lossy(&buffer[..n]), "Ignoring message"),
                }
            }
            _ = ticker.tick(), if sending => {
                let reading = simulator.next_reading(&mut rand::thread_rng());
                let mut payload = serde_json::to_vec(&reading)?;
                if args.newline {
                    payload.push(b'\n');
                }
                stream.write_all(&payload).await?;
                debug!(bytes = payload.len(), "Sent reading");
            }
        }
    }
}
