use async_ping::{ProbeConfigBuilder, ProbeEvent, ProbeSession, Protocol, Reporter, Summary};
use clap::Parser;
use std::fs::OpenOptions;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Simple example to show probing capabilities
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Host name or IP address to probe
    target: String,
    /// Probe protocol, `icmp` or `http`
    #[arg(short, long, default_value = "icmp")]
    protocol: Protocol,
    /// Number of probes, 0 probes until interrupted
    #[arg(short, long, default_value_t = 0)]
    count: u64,
    /// Milliseconds between probes
    #[arg(short, long, default_value_t = 1000)]
    interval: u64,
    /// Stop after this many seconds
    #[arg(short, long)]
    deadline: Option<u64>,
    /// Append every reported line to this file
    #[arg(short, long)]
    log: Option<PathBuf>,
}

struct StdoutReporter;

impl Reporter for StdoutReporter {
    fn on_event(&self, event: &ProbeEvent) {
        println!("{}", event);
    }

    fn on_summary(&self, summary: &Summary) {
        let stats = &summary.stats;
        let ms = |latency: Option<Duration>| {
            latency.map_or("-".to_string(), |l| format!("{:.3} ms", l.as_secs_f64() * 1000.0))
        };
        println!("--- {} {} statistics ---", summary.target, summary.protocol_label());
        println!("{:<10}{:>14}", "sent", stats.total);
        println!("{:<10}{:>14}", "ok", stats.successes);
        println!("{:<10}{:>14}", "failed", stats.failures);
        println!("{:<10}{:>13.1}%", "loss", stats.loss_percent());
        println!("{:<10}{:>14}", "min", ms(stats.min_latency));
        println!("{:<10}{:>14}", "avg", ms(stats.avg_latency()));
        println!("{:<10}{:>14}", "max", ms(stats.max_latency));
        println!("{:<10}{:>14}", "stddev", ms(stats.std_dev()));
        println!("{:<10}{:>14?}", "interval", summary.interval);
    }
}

async fn resolve_host(host: &str) -> std::io::Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    tokio::net::lookup_host(format!("{host}:0"))
        .await?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses found"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let target = match args.protocol {
        Protocol::Icmp => resolve_host(args.target.trim()).await.unwrap().to_string(),
        Protocol::Http => args.target.clone(),
    };
    let config = ProbeConfigBuilder::new(&target)
        .with_protocol(args.protocol)
        .with_count(args.count)
        .with_interval(Duration::from_millis(args.interval))
        .build()
        .unwrap();

    let interrupt = CancellationToken::new();
    {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.cancel();
            }
        });
    }

    let mut session = ProbeSession::new(config, Arc::new(StdoutReporter)).with_cancellation(&interrupt);
    if let Some(deadline) = args.deadline {
        session = session.with_deadline(Duration::from_secs(deadline));
    }
    if let Some(path) = args.log {
        let file = OpenOptions::new().create(true).append(true).open(path).unwrap();
        session = session.with_log_sink(file);
    }

    println!("PROBE {} ({})", args.target, target);
    session.run().await.unwrap();
}
