// Porchlight CLI binary

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use porchlight_lib::clock::{Clock, ManualClock, SystemClock};
use porchlight_lib::config::{self, AppConfig, SourceKind};
use porchlight_lib::connection::{classify, HttpProber, OnlineFlagProber, Prober};
use porchlight_lib::constants::RECENT_EVENTS_DEFAULT_LIMIT;
use porchlight_lib::db::{EventStore, SqliteEventStore};
use porchlight_lib::events::{JsonLinesSink, LogSink, WebhookNotifier};
use porchlight_lib::runtime::{ControlHandle, Supervisor};
use porchlight_lib::source::{open_source, FrameSource, SyntheticSource};
use porchlight_lib::tools;

#[derive(Parser)]
#[command(name = "porchlight")]
#[command(about = "Porchlight - motion detection and connection watchdog for a home camera", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the configured camera until stopped
    Watch {
        /// Also print every engine event as a JSON line on stdout
        #[arg(long)]
        json: bool,
    },

    /// Run the engine against a synthetic scene on a simulated clock
    Simulate {
        /// Simulated run length in seconds
        #[arg(long, default_value = "60")]
        seconds: u64,
        /// Motion window start (seconds)
        #[arg(long, default_value = "10")]
        motion_from: u64,
        /// Motion window end (seconds)
        #[arg(long, default_value = "20")]
        motion_to: u64,
        /// Camera offline window, e.g. 30-40
        #[arg(long)]
        offline: Option<String>,
        /// Simulated step in milliseconds
        #[arg(long, default_value = "100")]
        step_ms: u64,
    },

    /// List recent motion events
    Events {
        /// Maximum events to show
        #[arg(long, default_value_t = RECENT_EVENTS_DEFAULT_LIMIT)]
        limit: i64,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Probe a health URL once and classify the connection
    Probe {
        /// Health URL (defaults to connection.probeUrl)
        url: Option<String>,
    },

    /// Show or create the config file
    Config {
        /// Write the default config if none exists
        #[arg(long)]
        init: bool,
        /// Overwrite an existing file with --init
        #[arg(long)]
        force: bool,
    },

    /// Print a systemd unit for running the watcher as a service
    Service {
        /// User the service runs as
        #[arg(long, default_value = "pi")]
        user: String,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(p) => p,
        None => config::default_config_path()?,
    };

    match cli.command {
        Commands::Watch { json } => cmd_watch(&config_path, json),
        Commands::Simulate {
            seconds,
            motion_from,
            motion_to,
            offline,
            step_ms,
        } => cmd_simulate(&config_path, seconds, (motion_from, motion_to), offline, step_ms),
        Commands::Events { limit, json } => cmd_events(&config_path, limit, json),
        Commands::Probe { url } => cmd_probe(&config_path, url),
        Commands::Config { init, force } => cmd_config(&config_path, init, force),
        Commands::Service { user } => cmd_service(&config_path, &user),
    }
}

fn cmd_watch(config_path: &Path, json: bool) -> Result<()> {
    let config = config::load_config(config_path)?;

    if config.source.kind != SourceKind::Synthetic && !tools::is_ffmpeg_available() {
        anyhow::bail!(
            "ffmpeg not found at {} (set PORCHLIGHT_FFMPEG_PATH)",
            tools::ffmpeg_path().display()
        );
    }

    let source = open_source(&config)?;
    let liveness = source.liveness();
    let mut sup = Supervisor::new(&config, SystemClock::new(), source);
    sup.add_sink(Box::new(LogSink));
    if json {
        sup.add_sink(Box::new(JsonLinesSink::new(std::io::stdout())));
    }

    let db_path = config.database_path()?;
    sup.attach_recorder(Box::new(SqliteEventStore::open(&db_path)?))?;
    log::info!("Recording events to {}", db_path.display());

    match (&config.connection.probe_url, liveness) {
        (Some(url), _) => sup.attach_prober(Box::new(HttpProber::new(url)?))?,
        (None, Some(flag)) => sup.attach_prober(Box::new(OnlineFlagProber::new(flag)))?,
        (None, None) => log::warn!("No probe URL configured and the source has no liveness flag"),
    }

    if config.alerts.active_recipient().is_some() {
        if let Some(url) = &config.alerts.webhook_url {
            sup.attach_alerts(&config.alerts, Box::new(WebhookNotifier::new(url)?))?;
        }
    }

    spawn_stdin_controls(sup.control_handle())?;
    sup.run()?;
    Ok(())
}

/// Line commands on stdin steer a running watcher. EOF leaves it running.
fn spawn_stdin_controls(handle: ControlHandle) -> Result<()> {
    std::thread::Builder::new()
        .name("stdin-controls".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let sent = match line.trim() {
                    "" => continue,
                    "status" => match handle.status(Duration::from_secs(2)) {
                        Some(status) => {
                            match serde_json::to_string_pretty(&status) {
                                Ok(text) => println!("{}", text),
                                Err(e) => log::error!("Failed to render status: {}", e),
                            }
                            true
                        }
                        None => false,
                    },
                    "reconnect" => handle.force_reconnect(),
                    "reset" => handle.reset_attempts(),
                    "check" => handle.force_check(),
                    "online" => handle.back_online(),
                    "quit" | "stop" => handle.stop(),
                    other => {
                        println!("Unknown command '{}' (status, reconnect, reset, check, online, quit)", other);
                        true
                    }
                };
                if !sent {
                    break;
                }
            }
        })?;
    Ok(())
}

fn cmd_simulate(
    config_path: &Path,
    seconds: u64,
    motion: (u64, u64),
    offline: Option<String>,
    step_ms: u64,
) -> Result<()> {
    let mut config = config::load_config(config_path)?;
    config.schedule.schedule_enabled = false;

    let offline = offline.as_deref().map(parse_window).transpose()?;
    let step_ms = step_ms.max(1);

    let source = SyntheticSource::new(320, 240);
    let motion_switch = source.motion_switch();
    let online = source
        .liveness()
        .ok_or_else(|| anyhow::anyhow!("synthetic source has no liveness flag"))?;

    let clock = Rc::new(ManualClock::at_hour(12));
    let mut sup = Supervisor::new(&config, Rc::clone(&clock), Box::new(source));
    sup.add_sink(Box::new(JsonLinesSink::new(std::io::stdout())));
    sup.attach_recorder(Box::new(SqliteEventStore::open_in_memory()?))?;
    sup.attach_prober(Box::new(OnlineFlagProber::new(online.clone())))?;
    sup.start();

    let end_ms = seconds.saturating_mul(1000);
    let mut now = 0;
    while now <= end_ms {
        clock.set(now);
        let secs = now / 1000;
        motion_switch.store(secs >= motion.0 && secs < motion.1, Ordering::Relaxed);
        let is_offline = offline.map_or(false, |(from, to)| secs >= from && secs < to);
        online.store(!is_offline, Ordering::Relaxed);

        sup.tick();
        // Give the probe worker a moment to answer before simulated time moves on
        sup.process_inbox(Duration::from_millis(2));
        now += step_ms;
    }

    let status = sup.status();
    sup.shutdown();
    eprintln!("{}", serde_json::to_string_pretty(&status)?);
    log::info!("Simulated {} s ending at {}", seconds, clock.wall().to_rfc3339());
    Ok(())
}

fn parse_window(text: &str) -> Result<(u64, u64)> {
    let (from, to) = text
        .split_once('-')
        .ok_or_else(|| anyhow::anyhow!("expected FROM-TO in seconds, got '{}'", text))?;
    let from: u64 = from.trim().parse()?;
    let to: u64 = to.trim().parse()?;
    if to <= from {
        anyhow::bail!("window end must be after its start: '{}'", text);
    }
    Ok((from, to))
}

fn cmd_events(config_path: &Path, limit: i64, json: bool) -> Result<()> {
    let config = config::load_config(config_path)?;
    let db_path = config.database_path()?;
    if !db_path.exists() {
        println!("No events recorded yet ({} does not exist).", db_path.display());
        return Ok(());
    }

    let mut store = SqliteEventStore::open(&db_path)?;
    let events = store.recent_events(limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("No motion events recorded.");
        return Ok(());
    }

    println!("{:>5}  {:>25}  {:>25}  {:>6}  {:>6}  {}", "ID", "Started", "Cleared", "Level", "Peak", "Flags");
    println!("{}", "-".repeat(90));

    for event in events {
        let mut flags = Vec::new();
        if event.notified {
            flags.push("notified");
        }
        if event.recording_triggered {
            flags.push("recorded");
        }
        println!(
            "{:>5}  {:>25}  {:>25}  {:>6.1}  {:>6.1}  {}",
            event.id,
            event.started_at,
            event.cleared_at.as_deref().unwrap_or("open"),
            event.level,
            event.peak_level,
            flags.join(",")
        );
    }

    Ok(())
}

fn cmd_probe(config_path: &Path, url: Option<String>) -> Result<()> {
    let config = config::load_config(config_path)?;
    let url = url
        .or(config.connection.probe_url.clone())
        .ok_or_else(|| anyhow::anyhow!("No URL given and connection.probeUrl is not set"))?;

    let mut prober = HttpProber::new(&url)?;
    let outcome = prober.probe(Duration::from_millis(config.connection.probe_timeout_ms));

    match outcome.latency_ms {
        Some(ms) if outcome.success => println!("{}: {} ({} ms)", url, classify(ms), ms),
        _ => {
            println!("{}: {}", url, outcome.quality());
            std::process::exit(1);
        }
    }
    Ok(())
}

fn cmd_config(config_path: &Path, init: bool, force: bool) -> Result<()> {
    if init {
        if config_path.exists() && !force {
            anyhow::bail!("Config already exists at {} (use --force to overwrite)", config_path.display());
        }
        config::save_config(config_path, &AppConfig::default())?;
        println!("Wrote default config to {}", config_path.display());
        return Ok(());
    }

    let config = config::load_config(config_path)?;
    println!("# {}", config_path.display());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_service(config_path: &Path, user: &str) -> Result<()> {
    let exe = std::env::current_exe()?;
    println!("[Unit]");
    println!("Description=Porchlight camera motion watcher");
    println!("After=network-online.target");
    println!("Wants=network-online.target");
    println!();
    println!("[Service]");
    println!("Type=simple");
    println!("User={}", user);
    println!("ExecStart={} --config {} watch", exe.display(), config_path.display());
    println!("Restart=always");
    println!("RestartSec=10");
    println!("Environment=RUST_LOG=info");
    println!();
    println!("[Install]");
    println!("WantedBy=multi-user.target");
    Ok(())
}
