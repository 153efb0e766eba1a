use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;

use ultimatectl::device::{DeviceControl, DeviceSession, RestDevice};
use ultimatectl::ops::{
    self, CaptureFormat, CaptureRequest, PatternKind, ScanRequest, WriteRequest,
};
use ultimatectl::tasks::{Scheduler, StartRequest, Task, TaskKind, TaskStore};
use ultimatectl::util::hex::{parse_address, parse_hex_bytes};
use ultimatectl::util::paths;
use ultimatectl::util::time::now_stamp;
use ultimatectl::Config;

/// Control an Ultimate64-class machine over its REST API.
#[derive(Parser, Debug)]
#[command(name = "ultimatectl", version, about = "Ultimate64 control tool")]
struct Cli {
    /// Device host override (hostname or IP, optional :port)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Device API password override
    #[arg(long, global = true)]
    password: Option<String>,

    /// Data directory override (default: ~/.ultimatectl)
    #[arg(long = "data-dir", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run and manage tasks.
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Write bytes into machine memory with verification.
    Write {
        /// Target address ($0400, 0x0400 or decimal).
        address: String,
        /// Bytes to write, as hex ("AA BB" or "AABB").
        bytes: String,
        /// Bytes expected at the address before the write, as hex.
        #[arg(long)]
        expected: Option<String>,
        /// Per-byte bitmask for the expected comparison, as hex.
        #[arg(long)]
        mask: Option<String>,
        /// Write even if the expected bytes do not match.
        #[arg(long)]
        force: bool,
    },

    /// Capture a memory range to a local file.
    Capture {
        /// Start address.
        address: String,
        /// Number of bytes.
        length: usize,
        /// Output file (default: ~/.ultimatectl/captures/<stamp>.bin).
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Bytes per device read.
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Extra attempts per chunk after the first.
        #[arg(long)]
        retries: Option<usize>,
        /// Output encoding.
        #[arg(long, value_enum, default_value_t = FormatArg::Binary)]
        format: FormatArg,
        /// Pause the machine for the duration of the capture.
        #[arg(long)]
        pause: bool,
    },

    /// Snapshot, diff and restore the device configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Scan memory for sprite or charset shaped data.
    Scan {
        /// Start address.
        address: String,
        /// Window size in bytes.
        length: usize,
        /// Block shape to look for.
        #[arg(long, value_enum, default_value_t = KindArg::Sprite)]
        kind: KindArg,
        /// Step between candidates (default: the block size).
        #[arg(long)]
        stride: Option<usize>,
        /// Minimum non-empty rows for acceptance.
        #[arg(long)]
        min_rows: Option<usize>,
        /// Minimum total set bits for acceptance.
        #[arg(long)]
        min_bits: Option<usize>,
        /// Save each accepted candidate as a raw file here.
        #[arg(long)]
        save_dir: Option<PathBuf>,
        /// Include a base64 payload per candidate in the output.
        #[arg(long)]
        payload: bool,
    },

    /// List files on the device's storage matching a pattern.
    Files {
        /// Glob-style pattern, e.g. "*.prg".
        pattern: String,
    },

    /// Show device version and hardware info.
    Status,

    /// Reset the machine.
    Reset,
}

#[derive(Subcommand, Debug)]
enum TaskAction {
    /// Start a task. Runs inline unless --interval-ms makes it recurring.
    Start {
        /// Unique name among running tasks.
        name: String,
        /// Operation to run (read_memory, read_screen, device_info).
        operation: String,
        /// Operation arguments as JSON, e.g. '{"address": "$0400", "length": 16}'.
        #[arg(long, default_value = "{}")]
        args: String,
        /// Interval between runs in milliseconds (makes the task recurring).
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Stop after this many runs (recurring tasks only).
        #[arg(long)]
        iterations: Option<u64>,
    },
    /// Stop a task by id or name.
    Stop {
        task: String,
    },
    /// List all known tasks.
    List,
    /// Show one task record as JSON.
    Show {
        task: String,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Save every configuration category to a JSON snapshot.
    Snapshot {
        /// Output file (default: ~/.ultimatectl/snapshots/config_<stamp>.json).
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// Compare a snapshot against the live device.
    Diff {
        snapshot: PathBuf,
    },
    /// Apply a snapshot back to the device.
    Restore {
        snapshot: PathBuf,
        /// Also persist the restored settings to flash.
        #[arg(long)]
        flash: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FormatArg {
    Binary,
    Hex,
}

impl From<FormatArg> for CaptureFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Binary => CaptureFormat::Binary,
            FormatArg::Hex => CaptureFormat::Hex,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum KindArg {
    Sprite,
    Charset,
}

impl From<KindArg> for PatternKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Sprite => PatternKind::Sprite,
            KindArg::Charset => PatternKind::Charset,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Data dir precedence: flag, then environment, then config file.
    let dir_override = cli
        .data_dir
        .clone()
        .or_else(|| std::env::var("ULTIMATECTL_DATA_DIR").ok().map(PathBuf::from));
    if let Some(dir) = &dir_override {
        paths::init_data_dir(Some(dir.clone()));
    }

    let mut config = Config::load();
    if dir_override.is_none() {
        paths::init_data_dir(config.data_dir.clone());
    }
    if let Some(host) = cli.host.clone() {
        config.host = host;
    }
    if cli.password.is_some() {
        config.password = cli.password.clone();
    }

    // Initialize logging to file (~/.ultimatectl/logs/ultimatectl.log)
    fs::create_dir_all(paths::logs_dir())?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths::log_file_path())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(log_file)
        .with_ansi(false) // Disable ANSI colors in log file
        .init();

    let device: Arc<dyn DeviceControl> = Arc::new(RestDevice::with_timeout(
        &config.host,
        config.password.clone(),
        Duration::from_secs(config.timeout_secs),
    ));
    let session = DeviceSession::new(Arc::clone(&device));

    match cli.command {
        Commands::Task { action } => {
            let store = Arc::new(TaskStore::new(paths::data_dir()));
            store.ensure_loaded()?;
            let scheduler = Scheduler::new(Arc::clone(&store), Arc::clone(&device));
            run_task(action, &scheduler, &store).await?;
        }

        Commands::Write {
            address,
            bytes,
            expected,
            mask,
            force,
        } => {
            let address = parse_address(&address)
                .with_context(|| format!("Invalid address: {}", address))?;
            let bytes = parse_hex_bytes(&bytes).context("Invalid hex in bytes")?;
            let mut request = WriteRequest::new(address, bytes);
            request.expected = match expected {
                Some(s) => Some(parse_hex_bytes(&s).context("Invalid hex in --expected")?),
                None => None,
            };
            request.mask = match mask {
                Some(s) => Some(parse_hex_bytes(&s).context("Invalid hex in --mask")?),
                None => None,
            };
            request.abort_on_mismatch = !force;

            let outcome = ops::verified_write(&session, request).await?;
            println!("Wrote {} byte(s) at ${:04X}", outcome.written.len(), outcome.address);
            println!("  before: {}", outcome.before_hex());
            println!("  after:  {}", outcome.after_hex());
        }

        Commands::Capture {
            address,
            length,
            output,
            chunk_size,
            retries,
            format,
            pause,
        } => {
            let address = parse_address(&address)
                .with_context(|| format!("Invalid address: {}", address))?;
            let output = output
                .unwrap_or_else(|| paths::captures_dir().join(format!("{}.bin", now_stamp())));
            let mut request = CaptureRequest::new(address, length, output);
            request.chunk_size = chunk_size.unwrap_or(config.capture_chunk_size);
            request.retries = retries.unwrap_or(config.capture_retries);
            request.format = format.into();
            request.pause = pause;

            let manifest = ops::capture(&session, request).await?;
            println!("Captured {} bytes from {}", manifest.length, manifest.address);
            println!("  output:   {}", manifest.output.display());
            println!("  sha256:   {}", manifest.checksum);
        }

        Commands::Config { action } => match action {
            ConfigAction::Snapshot { output } => {
                let output = output.unwrap_or_else(|| {
                    paths::snapshots_dir().join(format!("config_{}.json", now_stamp()))
                });
                let snapshot = ops::snapshot(&*device, &output).await?;
                let readable = snapshot.readable_categories().count();
                println!(
                    "Snapshot of {} categories ({} readable) written to {}",
                    snapshot.categories.len(),
                    readable,
                    output.display()
                );
            }
            ConfigAction::Diff { snapshot } => {
                let report = ops::diff(&*device, &snapshot).await?;
                if report.is_clean() && report.unreadable.is_empty() {
                    println!("Device matches the snapshot");
                } else {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
            ConfigAction::Restore { snapshot, flash } => {
                let applied = ops::restore(&*device, &snapshot, flash).await?;
                println!(
                    "Restored {} categor{} from {}",
                    applied,
                    if applied == 1 { "y" } else { "ies" },
                    snapshot.display()
                );
            }
        },

        Commands::Scan {
            address,
            length,
            kind,
            stride,
            min_rows,
            min_bits,
            save_dir,
            payload,
        } => {
            let address = parse_address(&address)
                .with_context(|| format!("Invalid address: {}", address))?;
            let mut request = ScanRequest::new(address, length, kind.into());
            if let Some(stride) = stride {
                request.stride = stride;
            }
            if let Some(min_rows) = min_rows {
                request.min_rows = min_rows;
            }
            if let Some(min_bits) = min_bits {
                request.min_bits = min_bits;
            }
            request.save_dir = save_dir;
            request.include_payload = payload;

            let found = ops::scan(&*device, request).await?;
            if found.is_empty() {
                println!("No candidates found");
            } else {
                println!("{}", serde_json::to_string_pretty(&found)?);
            }
        }

        Commands::Files { pattern } => {
            let files = device.files_info(&pattern).await?;
            if files.is_empty() {
                println!("No files match {}", pattern);
            }
            for file in files {
                println!("{}", file);
            }
        }

        Commands::Status => {
            let version = device.version().await?;
            let info = device.info().await?;
            println!("{}", serde_json::to_string_pretty(&version)?);
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Reset => {
            device.reset().await?;
            println!("Machine reset");
        }
    }

    Ok(())
}

async fn run_task(action: TaskAction, scheduler: &Scheduler, store: &Arc<TaskStore>) -> Result<()> {
    match action {
        TaskAction::Start {
            name,
            operation,
            args,
            interval_ms,
            iterations,
        } => {
            let args: Value =
                serde_json::from_str(&args).context("--args must be a JSON object")?;
            let kind = if interval_ms.is_some() {
                TaskKind::Background
            } else {
                TaskKind::Foreground
            };
            let request = StartRequest {
                name,
                kind,
                operation,
                args,
                interval_ms,
                max_iterations: iterations,
            };

            let task = scheduler.start(request).await?;
            match kind {
                TaskKind::Foreground => print_task(&task),
                TaskKind::Background => {
                    println!("{} running (ctrl-c to stop)", task.id);
                    watch_until_done(scheduler, store, &task.id).await;
                    if let Some(task) = store.get(&task.id) {
                        print_task(&task);
                    }
                }
            }
        }
        TaskAction::Stop { task } => match scheduler.stop(&task) {
            Some(task) => print_task(&task),
            None => println!("No such task: {}", task),
        },
        TaskAction::List => {
            let tasks = store.list();
            if tasks.is_empty() {
                println!("No tasks");
            }
            for task in tasks {
                print_task(&task);
            }
        }
        TaskAction::Show { task } => match store.find(&task) {
            Some(task) => println!("{}", serde_json::to_string_pretty(&task)?),
            None => println!("No such task: {}", task),
        },
    }
    Ok(())
}

/// Block until the task reaches a terminal status or ctrl-c stops it.
async fn watch_until_done(scheduler: &Scheduler, store: &Arc<TaskStore>, id: &str) {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                scheduler.stop(id);
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                match store.get(id) {
                    Some(task) if !task.status.is_terminal() => {}
                    _ => break,
                }
            }
        }
    }
}

fn print_task(task: &Task) {
    println!(
        "{}  {:>9}  {}  runs={}{}",
        task.id,
        task.status.as_str(),
        task.operation,
        task.iterations,
        task.last_error
            .as_deref()
            .map(|e| format!("  error: {}", e))
            .unwrap_or_default()
    );
}
