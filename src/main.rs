//! golden-sd CLI
//!
//! Entry point for the `golden-sd` binary: the one-shot RPC handler, one
//! subcommand per operation, and the hidden detached-worker entry.

use std::io;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use gsd_protocol::ops::names;
use gsd_protocol::{RpcError, RpcRequest, RpcResponse};
use serde_json::json;

use golden_sd::jobs::is_valid_job_id;
use golden_sd::logging::init_tracing;
use golden_sd::rpc::write_response;
use golden_sd::{Appliance, Config, RpcHandler};

#[derive(Parser)]
#[command(name = "golden-sd")]
#[command(about = "Download OS images and flash them to removable storage", version)]
struct Cli {
    /// Path to config file (default: $GOLDEN_SD_CONFIG or /etc/golden-sd/config.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read one JSON request from stdin and write one JSON response to stdout
    Rpc,

    /// Start (or reuse) a cached download of a catalog image
    Download {
        os_id: String,
    },

    /// Show the effective status of a job
    Status {
        job_id: String,
    },

    /// Show the last lines of a job's log
    Tail {
        job_id: String,

        /// Number of lines (clamped to 1..=2000)
        #[arg(long, short = 'n')]
        max_lines: Option<usize>,
    },

    /// List catalog images, optionally filtered by a search query
    Os {
        /// Search terms; "raspi" and "rpi" match Raspberry images
        query: Option<String>,
    },

    /// Show the write policy, the live arm and the eligible targets
    Safety,

    /// Check a target and image and issue a plan id for arming
    PlanFlash {
        #[arg(long)]
        target: String,

        #[arg(long)]
        os_id: String,
    },

    /// Arm a target for a single flash
    Arm {
        /// Id returned by plan-flash
        #[arg(long)]
        plan_id: String,

        #[arg(long)]
        target: String,

        #[arg(long)]
        os_id: String,

        /// Must repeat --target exactly
        #[arg(long)]
        confirm_target: String,

        /// The configured confirmation word
        #[arg(long)]
        word: String,

        /// Trailing characters of the target disk's serial
        #[arg(long)]
        serial_suffix: Option<String>,
    },

    /// Show whether an arm is active (never prints the token)
    ArmStatus,

    /// Clear any active arm
    Disarm,

    /// Write the cached image to the armed target
    Flash {
        #[arg(long)]
        target: String,

        #[arg(long)]
        os_id: String,

        #[arg(long)]
        token: String,

        #[arg(long)]
        confirm_target: String,

        #[arg(long)]
        serial_suffix: Option<String>,
    },

    /// List disks and whether each may be written
    Targets,

    /// Detached worker entry (invoked by the job launcher)
    #[command(hide = true)]
    Worker {
        #[command(subcommand)]
        action: WorkerCommands,
    },
}

#[derive(Subcommand)]
enum WorkerCommands {
    /// Execute one job script and record its completion code
    Run {
        #[arg(long)]
        jobs_dir: PathBuf,

        #[arg(long)]
        job_id: String,
    },
}

fn main() {
    let cli = Cli::parse();

    // The worker owns its log file; it neither loads config nor logs to stderr.
    let command = match cli.command {
        Commands::Worker {
            action: WorkerCommands::Run { jobs_dir, job_id },
        } => run_worker(&jobs_dir, &job_id),
        other => other,
    };

    init_tracing();

    let handler = match build_handler(cli.config) {
        Ok(handler) => handler,
        Err(e) => {
            emit(&RpcResponse::error(0, String::new(), e));
            process::exit(1);
        }
    };

    let request = match command {
        Commands::Rpc => {
            if let Err(e) = handler.run() {
                eprintln!("Failed to write response: {}", e);
                process::exit(1);
            }
            return;
        }
        Commands::Download { os_id } => cli_request(names::START_DOWNLOAD, json!({ "os_id": os_id })),
        Commands::Status { job_id } => cli_request(names::STATUS, json!({ "job_id": job_id })),
        Commands::Tail { job_id, max_lines } => {
            cli_request(names::TAIL, json!({ "job_id": job_id, "max_lines": max_lines }))
        }
        Commands::Os { query } => cli_request(names::OS, json!({ "q": query })),
        Commands::Safety => cli_request(names::SAFETY, json!({})),
        Commands::PlanFlash { target, os_id } => {
            cli_request(names::PLAN_FLASH, json!({ "target": target, "os_id": os_id }))
        }
        Commands::Arm {
            plan_id,
            target,
            os_id,
            confirm_target,
            word,
            serial_suffix,
        } => cli_request(
            names::ARM,
            json!({
                "plan_id": plan_id,
                "target": target,
                "os_id": os_id,
                "confirm_target": confirm_target,
                "word": word,
                "serial_suffix": serial_suffix,
            }),
        ),
        Commands::ArmStatus => cli_request(names::ARM_STATUS, json!({})),
        Commands::Disarm => cli_request(names::DISARM, json!({})),
        Commands::Flash {
            target,
            os_id,
            token,
            confirm_target,
            serial_suffix,
        } => cli_request(
            names::FLASH,
            json!({
                "target": target,
                "os_id": os_id,
                "token": token,
                "confirm_target": confirm_target,
                "serial_suffix": serial_suffix,
            }),
        ),
        Commands::Targets => cli_request(names::TARGETS, json!({})),
        Commands::Worker { action } => match action {
            WorkerCommands::Run { jobs_dir, job_id } => run_worker(&jobs_dir, &job_id),
        },
    };

    let response = handler.handle_request(&request);
    emit(&response);
    process::exit(if response.ok { 0 } else { 1 });
}

fn run_worker(jobs_dir: &Path, job_id: &str) -> ! {
    if !is_valid_job_id(job_id) {
        eprintln!("invalid job_id");
        process::exit(gsd_worker::exit_codes::INVALID_SCRIPT);
    }
    process::exit(gsd_worker::run_job(jobs_dir, job_id))
}

fn build_handler(config_path: Option<PathBuf>) -> Result<RpcHandler, RpcError> {
    let config = Config::load(config_path.as_deref())
        .map_err(|e| RpcError::internal(format!("configuration error: {}", e)))?;
    let appliance = Appliance::from_config(config).map_err(|e| RpcError::internal(e.to_string()))?;
    Ok(RpcHandler::new(appliance))
}

fn cli_request(op: &str, payload: serde_json::Value) -> RpcRequest {
    RpcRequest::new(op, format!("cli-{}", process::id()), payload)
}

fn emit(response: &RpcResponse) {
    if let Err(e) = write_response(&mut io::stdout().lock(), response) {
        eprintln!("Failed to write response: {}", e);
        process::exit(1);
    }
}
