//! Command-line host for the Reflex automation runtime.
//!
//! `reflex run` loads a rule config (and optionally behavior trees), wires
//! the demo actions and drives the tick loop; `reflex check` validates
//! config files and exits non-zero on problems.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use reflex_bt::BtManager;
use reflex_core::{Context, Engine, RingHistoryProvider, Value};
use reflex_persistence::ConfigWatcher;

/// Reflex - declarative automation for sensor-driven environments.
#[derive(Parser, Debug)]
#[command(name = "reflex")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a config and run the tick loop.
    Run {
        /// Rule config file (JSON).
        #[arg(short, long)]
        config: PathBuf,
        /// Behavior-tree file: an object of name -> tree document.
        #[arg(long)]
        trees: Option<PathBuf>,
        /// Tick interval in milliseconds.
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
        /// Stop after this many ticks (runs forever by default).
        #[arg(long)]
        max_ticks: Option<u64>,
        /// Initial context entries as key=value pairs (values parsed as
        /// JSON, falling back to strings).
        #[arg(long = "set", value_name = "KEY=VALUE")]
        sets: Vec<String>,
        /// Reload the config when the file changes.
        #[arg(long)]
        watch: bool,
    },
    /// Validate config files and exit.
    Check {
        /// Rule config file (JSON).
        #[arg(short, long)]
        config: PathBuf,
        /// Behavior-tree file to validate as well.
        #[arg(long)]
        trees: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Run {
            config,
            trees,
            interval_ms,
            max_ticks,
            sets,
            watch,
        } => run(config, trees, interval_ms, max_ticks, sets, watch),
        Command::Check { config, trees } => check(config, trees),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let json_logging = std::env::var("REFLEX_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

fn load_config(path: &PathBuf) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("cannot parse config file {}", path.display()))
}

fn load_trees(manager: &BtManager, path: &PathBuf) -> Result<usize> {
    let doc = load_config(path)?;
    let obj = doc
        .as_object()
        .context("tree file must be an object of name -> tree document")?;
    for (name, tree) in obj {
        manager
            .load_tree(name, tree)
            .with_context(|| format!("tree '{name}' in {}", path.display()))?;
    }
    Ok(obj.len())
}

fn run(
    config_path: PathBuf,
    trees: Option<PathBuf>,
    interval_ms: u64,
    max_ticks: Option<u64>,
    sets: Vec<String>,
    watch: bool,
) -> Result<()> {
    let history = Arc::new(RingHistoryProvider::new(256));
    let mut engine = Engine::new();
    engine.set_history(history.clone());
    register_demo_actions(&mut engine);

    let config = load_config(&config_path)?;
    engine
        .load(&config)
        .with_context(|| format!("invalid config {}", config_path.display()))?;
    info!(rules = engine.rule_count(), "engine ready");

    let bt_manager = Arc::new(BtManager::new());
    if let Some(trees_path) = &trees {
        let count = load_trees(&bt_manager, trees_path)?;
        info!(trees = count, "behavior trees ready");
    }

    let engine = Arc::new(Mutex::new(engine));
    let shutdown = Arc::new(AtomicBool::new(false));

    // Keep the watcher alive for the life of the run.
    let _watcher = if watch {
        let watcher = ConfigWatcher::new()?;
        watcher.watch(&config_path)?;
        let engine_for_reload = engine.clone();
        watcher.on_change(
            &config_path,
            Arc::new(move |path, new_config| {
                let mut engine = engine_for_reload.lock().unwrap();
                match engine.load(new_config) {
                    Ok(()) => info!(path = %path.display(), "config reloaded"),
                    Err(e) => warn!(path = %path.display(), %e, "reload rejected, keeping previous rules"),
                }
            }),
        );
        Some(watcher)
    } else {
        None
    };

    {
        let shutdown = shutdown.clone();
        stdin_shutdown_hook(move || shutdown.store(true, Ordering::SeqCst));
    }

    let mut ctx = Context::new();
    for entry in &sets {
        let (key, value) = entry
            .split_once('=')
            .with_context(|| format!("--set expects key=value, got '{entry}'"))?;
        let value: Value = match serde_json::from_str::<serde_json::Value>(value) {
            Ok(json) => Value::from(json),
            Err(_) => Value::from(value),
        };
        ctx.set(key, value);
    }

    let mut ticks = 0u64;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            info!("shutting down");
            break;
        }
        if let Some(max) = max_ticks {
            if ticks >= max {
                info!(ticks, "tick budget reached");
                break;
            }
        }

        history.record_context(&ctx);
        engine.lock().unwrap().tick(&mut ctx);
        for name in bt_manager.tree_names() {
            bt_manager.execute(&name, &mut ctx);
        }
        ticks += 1;
        std::thread::sleep(Duration::from_millis(interval_ms));
    }

    Ok(())
}

fn check(config_path: PathBuf, trees: Option<PathBuf>) -> Result<()> {
    let config = load_config(&config_path)?;
    let mut engine = Engine::new();
    engine
        .load(&config)
        .with_context(|| format!("invalid config {}", config_path.display()))?;
    println!("{}: {} rules ok", config_path.display(), engine.rule_count());

    if let Some(trees_path) = trees {
        let manager = BtManager::new();
        let count = load_trees(&manager, &trees_path)?;
        println!("{}: {count} trees ok", trees_path.display());
    }
    Ok(())
}

/// Demo actions so configs are runnable out of the box: `log` prints its
/// `message` param, `set` writes `key`/`value` into the context.
fn register_demo_actions(engine: &mut Engine) {
    engine.register_action(
        "log",
        Box::new(|params: &Value, _ctx: &mut Context| {
            info!(message = %params.get("message"), "rule action");
        }),
    );
    engine.register_action(
        "set",
        Box::new(|params: &Value, ctx: &mut Context| {
            if let Some(key) = params.get("key").as_str() {
                ctx.set(key, params.get("value"));
            }
        }),
    );
}

/// Orderly shutdown on host request: the tick loop stops once the host
/// closes stdin (ctrl-d in a terminal, pipe close under a supervisor).
/// Interactive interrupts keep the process default behavior.
fn stdin_shutdown_hook(on_request: impl FnOnce() + Send + 'static) {
    let _ = std::thread::Builder::new()
        .name("reflex-shutdown".to_string())
        .spawn(move || {
            let mut buf = String::new();
            while std::io::stdin()
                .read_line(&mut buf)
                .map(|n| n > 0)
                .unwrap_or(false)
            {
                buf.clear();
            }
            on_request();
        });
}
