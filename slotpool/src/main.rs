//! slotpool-demo: drive a pool with concurrent requests against a slow resource
//! and check that no caller ever sees a dead handle.

use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use slotpool::{Resource, SlotPool, logging};
use tracing::{info, warn};

const RETRIES: usize = 3;

struct Connection {
    id: u64,
    active: AtomicBool,
}

/// Simulated connection factory: 10-15ms to open, random positive ids.
struct Connector {
    fail_rate: f64,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

#[async_trait]
impl Resource for Connector {
    type Handle = Connection;

    async fn acquire(&self) -> anyhow::Result<Connection> {
        let (delay, id, fail) = {
            let mut rng = rand::rng();
            (
                rng.random_range(10..=15),
                rng.random_range(1..=100),
                rng.random_bool(self.fail_rate),
            )
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;

        if fail {
            anyhow::bail!("simulated connect failure");
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Connection {
            id,
            active: AtomicBool::new(true),
        })
    }

    async fn release(&self, handle: Arc<Connection>) {
        handle.active.store(false, Ordering::SeqCst);
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct Options {
    requests: u64,
    fail_rate: f64,
    verbose: bool,
}

enum Outcome {
    Served,
    GaveUp,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let options = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("error: {msg}");
            eprintln!();
            eprintln!("Usage: slotpool-demo [--requests <n>] [--fail-rate <p>] [--verbose]");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --requests <n>   Concurrent requests to issue [default: 100]");
            eprintln!("  --fail-rate <p>  Probability in [0, 1] that an open fails [default: 0]");
            eprintln!("  --verbose        Enable per-operation pool diagnostics");
            process::exit(2);
        }
    };

    logging::init_tracing(options.verbose);

    if let Err(e) = run(options).await {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut options = Options {
        requests: 100,
        fail_rate: 0.0,
        verbose: false,
    };

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--requests" => {
                i += 1;
                let raw = args.get(i).ok_or("--requests requires a value")?;
                options.requests = raw
                    .parse()
                    .map_err(|_| format!("invalid request count '{raw}'"))?;
            }
            "--fail-rate" => {
                i += 1;
                let raw = args.get(i).ok_or("--fail-rate requires a value")?;
                let rate: f64 = raw
                    .parse()
                    .map_err(|_| format!("invalid fail rate '{raw}'"))?;
                if !(0.0..=1.0).contains(&rate) {
                    return Err(format!("fail rate must be within [0, 1], got {rate}"));
                }
                options.fail_rate = rate;
            }
            "--verbose" | "-v" => options.verbose = true,
            "--help" | "-h" => return Err("".to_string()),
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    Ok(options)
}

async fn run(options: Options) -> anyhow::Result<()> {
    let pool = Arc::new(
        SlotPool::builder()
            .resource(Connector {
                fail_rate: options.fail_rate,
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
            })
            .size(4)
            .recalibration_stride(5)
            .sweep_period(Duration::from_millis(30))
            .idle_threshold(Duration::from_millis(20))
            .verbose(options.verbose)
            .build()?,
    );

    info!(
        config = %serde_json::to_string(pool.config())?,
        requests = options.requests,
        "Pool ready"
    );

    let mut tasks = Vec::new();
    for request in 0..options.requests {
        let pool = Arc::clone(&pool);
        tasks.push(tokio::spawn(
            async move { run_request(&pool, request).await },
        ));
        let pause = rand::rng().random_range(5..=10);
        tokio::time::sleep(Duration::from_millis(pause)).await;
    }

    let mut served = 0usize;
    let mut gave_up = 0usize;
    for joined in futures::future::join_all(tasks).await {
        match joined?? {
            Outcome::Served => served += 1,
            Outcome::GaveUp => gave_up += 1,
        }
    }

    let status = pool.status();
    info!(
        served,
        gave_up,
        status = %serde_json::to_string(&status)?,
        "All requests finished"
    );

    pool.shutdown().await;

    let Some(connector) = pool.template() else {
        anyhow::bail!("pool lost its resource template");
    };
    let opened = connector.opened.load(Ordering::SeqCst);
    let closed = connector.closed.load(Ordering::SeqCst);
    info!(opened, closed, "Connections accounted");

    if opened != closed {
        anyhow::bail!("{opened} connections opened but {closed} closed after shutdown");
    }
    if options.fail_rate == 0.0 && gave_up > 0 {
        anyhow::bail!("{gave_up} requests failed without any injected failures");
    }
    Ok(())
}

/// One caller: get, lock, open, use, unlock. A failed open forces a clean
/// and retries, up to `RETRIES` attempts.
async fn run_request(pool: &SlotPool<Connector>, request: u64) -> anyhow::Result<Outcome> {
    for attempt in 1..=RETRIES {
        let slot = pool.get()?;
        let guard = slot.lock().await;
        let opened = guard.try_open().await;

        match opened {
            Ok(conn) => {
                if conn.id == 0 || !conn.active.load(Ordering::SeqCst) {
                    anyhow::bail!(
                        "request {request} got a dead handle from slot {}",
                        guard.slot().index()
                    );
                }

                let work = rand::rng().random_range(5..=30);
                tokio::time::sleep(Duration::from_millis(work)).await;

                if !conn.active.load(Ordering::SeqCst) {
                    anyhow::bail!(
                        "slot {} closed its handle while request {request} held it",
                        guard.slot().index()
                    );
                }
                return Ok(Outcome::Served);
            }
            Err(e) => {
                guard.unlock();
                warn!(request, attempt, error = %e, "Open failed - forcing clean");
                pool.clean(true).await;
            }
        }
    }

    Ok(Outcome::GaveUp)
}
