//! ESDM daemon.
//!
//! Command-line front-end for the entropy source and DRNG manager core:
//! loads configuration, initializes the service, demonstrates blocking
//! output and optionally keeps running as a status-reporting daemon.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{info, warn};

use esdm_core::{EsdmBuilder, EsdmConfig, FileConfig, ForceFips};

#[derive(Parser, Debug)]
#[command(name = "esdm", version, about = "Entropy source and DRNG manager")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Force FIPS mode: "on" or "off".
    #[arg(long)]
    force_fips: Option<String>,

    /// CPU source entropy rate override (bits).
    #[arg(long)]
    cpu_rate: Option<u32>,

    /// Jitter source entropy rate override (bits).
    #[arg(long)]
    jent_rate: Option<u32>,

    /// Kernel-RNG source entropy rate override (bits).
    #[arg(long)]
    krng_rate: Option<u32>,

    /// Scheduler source entropy rate override (bits).
    #[arg(long)]
    sched_rate: Option<u32>,

    /// Upper limit of per-node DRNG instances.
    #[arg(long)]
    max_nodes: Option<u32>,

    /// Maximum seconds between reseeds (0 reseeds every generate).
    #[arg(long)]
    reseed_max_time: Option<u32>,

    /// Bytes of demonstration output to generate.
    #[arg(long, default_value_t = 32)]
    bytes: usize,

    /// Keep running and report status periodically.
    #[arg(long)]
    daemon: bool,

    /// Seconds between status reports in daemon mode.
    #[arg(long, default_value_t = 60)]
    status_interval: u64,
}

fn load_file_config(cli: &Cli) -> Result<FileConfig, String> {
    let mut file = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            toml::from_str(&raw).map_err(|e| format!("cannot parse {}: {}", path.display(), e))?
        }
        None => FileConfig::default(),
    };

    // CLI overrides win over file values.
    if let Some(v) = cli.cpu_rate {
        file.es_cpu_entropy_rate_bits = Some(v);
    }
    if let Some(v) = cli.jent_rate {
        file.es_jent_entropy_rate_bits = Some(v);
    }
    if let Some(v) = cli.krng_rate {
        file.es_krng_entropy_rate_bits = Some(v);
    }
    if let Some(v) = cli.sched_rate {
        file.es_sched_entropy_rate_bits = Some(v);
    }
    if let Some(v) = cli.max_nodes {
        file.max_nodes = Some(v);
    }
    if let Some(v) = cli.reseed_max_time {
        file.reseed_max_time_secs = Some(v);
    }
    if let Some(v) = &cli.force_fips {
        file.force_fips = Some(match v.as_str() {
            "on" => ForceFips::On,
            "off" => ForceFips::Off,
            other => return Err(format!("invalid --force-fips value: {}", other)),
        });
    }

    Ok(file)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    info!("ESDM v{}", esdm_core::VERSION);

    let file = match load_file_config(&cli) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    let config = Arc::new(EsdmConfig::from_file_config(&file));

    let esdm = match EsdmBuilder::new().with_config(config).build() {
        Ok(esdm) => esdm,
        Err(e) => {
            eprintln!("Failed to initialize ESDM: {}", e);
            std::process::exit(1);
        }
    };

    if esdm.sp80090c_compliant() {
        info!("operating with SP 800-90C oversampling");
    }

    // Demonstrate blocking output.
    if cli.bytes > 0 {
        let mut out = vec![0u8; cli.bytes];
        match esdm.get_random_bytes_full(&mut out) {
            Ok(n) => {
                println!(
                    "Random bytes: {}",
                    out[..n].iter().map(|b| format!("{:02x}", b)).collect::<String>()
                );
            }
            Err(e) => warn!("generate failed: {}", e),
        }
    }

    print!("{}", esdm.status());

    if cli.daemon {
        let running = Arc::new(AtomicBool::new(true));
        let r = Arc::clone(&running);
        if let Err(e) = ctrlc::set_handler(move || {
            r.store(false, Ordering::SeqCst);
        }) {
            warn!("cannot install signal handler: {}", e);
        }

        info!(
            interval = cli.status_interval,
            "entering daemon mode, Ctrl-C to stop"
        );

        let mut last_report = Instant::now();
        while running.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(200));

            if last_report.elapsed() >= Duration::from_secs(cli.status_interval) {
                let snapshot = esdm.status_snapshot();
                info!(
                    stage = snapshot.stage.name(),
                    avail_entropy = snapshot.avail_entropy_bits,
                    need_entropy = snapshot.need_entropy,
                    "status report"
                );
                last_report = Instant::now();
            }
        }
        info!("shutting down");
    }

    esdm.fini();
}
