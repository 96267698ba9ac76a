use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const DEFAULT_ADDR: &str = "127.0.0.1:12345";
const MAX_CHUNK_SIZE: usize = 1024;

#[derive(Debug, Default, Deserialize)]
struct Batch {
    #[serde(default)]
    cmd: Vec<String>,
    #[serde(default)]
    msg_data: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct VehicleMessage {
    status: &'static str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    msg_data: BTreeMap<&'static str, String>,
}

struct Args {
    addr: String,
    interval: Duration,
    silent_after: Option<u64>,
}

fn parse_args() -> Result<Args, Box<dyn std::error::Error>> {
    let mut args = Args {
        addr: DEFAULT_ADDR.to_string(),
        interval: Duration::from_millis(500),
        silent_after: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--interval-ms" => {
                let ms: u64 = it.next().ok_or("missing value for --interval-ms")?.parse()?;
                args.interval = Duration::from_millis(ms);
            }
            "--silent-after" => {
                let n = it.next().ok_or("missing value for --silent-after")?.parse()?;
                args.silent_after = Some(n);
            }
            other if !other.starts_with("--") => args.addr = other.to_string(),
            other => return Err(format!("unknown flag: {other}").into()),
        }
    }
    Ok(args)
}

fn gps_sentence(rng: &mut impl Rng) -> String {
    let lat: f64 = rng.gen_range(5500.0..5600.0);
    let lon: f64 = rng.gen_range(2000.0..2100.0);
    let alt: f64 = rng.gen_range(10.0..20.0);
    let time: u32 = rng.gen_range(100000..235959);
    let course: f64 = rng.gen_range(0.0..360.0);
    let speed: f64 = rng.gen_range(0.0..60.0);
    format!(
        "D,s,1,1,{lat:.4},N,{lon:.4},E,{alt:.1},{time},{course:.3},{speed:.3},*{:02}",
        rng.gen_range(0..100)
    )
}

fn imu_sentence(rng: &mut impl Rng) -> String {
    let ax: f64 = rng.gen_range(-0.2..0.2);
    let ay: f64 = rng.gen_range(-0.2..0.2);
    let az: f64 = rng.gen_range(9.6..10.0);
    format!("D,s,1,3,{ax:.3},{ay:.3},{az:.3},*{:02}", rng.gen_range(0..100))
}

// Answers telemetry the previous batch asked for, otherwise pings.
fn next_message(previous: &Batch, rng: &mut impl Rng) -> VehicleMessage {
    let mut msg_data = BTreeMap::new();
    if previous.cmd.iter().any(|c| c == "GPS") {
        msg_data.insert("GPSRESPONSE", gps_sentence(rng));
    }
    if previous.cmd.iter().any(|c| c == "IMU") {
        msg_data.insert("IMURESPONSE", imu_sentence(rng));
    }
    let status = if msg_data.is_empty() { "PING" } else { "RESPONSE" };
    VehicleMessage { status, msg_data }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args()?;

    println!("peer-dev-client: connecting to {}", args.addr);
    let mut stream = loop {
        match TcpStream::connect(args.addr.as_str()).await {
            Ok(stream) => break stream,
            Err(_) => tokio::time::sleep(Duration::from_millis(250)).await,
        }
    };
    println!("peer-dev-client: connected");

    let mut rng = rand::thread_rng();
    let mut previous = Batch::default();
    let mut buf = vec![0u8; MAX_CHUNK_SIZE];
    let mut sent = 0u64;

    loop {
        if args.silent_after.is_some_and(|limit| sent >= limit) {
            println!("peer-dev-client: going silent after {sent} messages");
            while stream.read(&mut buf).await? > 0 {}
            println!("peer-dev-client: bridge closed the connection");
            return Ok(());
        }

        let msg = next_message(&previous, &mut rng);
        stream.write_all(&serde_json::to_vec(&msg)?).await?;
        sent += 1;
        println!("-> {}", serde_json::to_string(&msg)?);

        let n = stream.read(&mut buf).await?;
        if n == 0 {
            println!("peer-dev-client: bridge closed the connection");
            return Ok(());
        }
        previous = match serde_json::from_slice::<Batch>(&buf[..n]) {
            Ok(batch) => batch,
            Err(err) => {
                eprintln!("peer-dev-client: unreadable batch: {err}");
                Batch::default()
            }
        };
        println!("<- {}", String::from_utf8_lossy(&buf[..n]));
        for (token, payload) in &previous.msg_data {
            println!("   {token} = {payload:?}");
        }

        tokio::time::sleep(args.interval).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    run().await
}
