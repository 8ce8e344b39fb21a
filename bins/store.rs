use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use serde_json::Value;
use service::profile_service::{self, ProfileUpdate};
use service::{goal_service, history_service, StudentId};
use storage::{spawn_maintenance, KvStore};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "store", version, about = "AlphaX tracker record store")]
struct Cli {
    /// Emit JSON logs instead of the compact format
    #[arg(long, global = true, env = "LOG_JSON")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print one record
    Get { key: String },
    /// Replace a record with a JSON value
    Set {
        key: String,
        value: String,
        /// Seconds until expiry; 0 never expires, omitted uses the namespace default
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Shallow-merge a JSON object into a record
    Merge {
        key: String,
        patch: String,
        #[arg(long)]
        ttl: Option<u64>,
    },
    Delete { key: String },
    /// List records whose key starts with PREFIX
    List { prefix: String },
    /// Replay degraded writes and purge expired records
    Flush,
    /// Show a student profile, or update it when any field flag is given
    Profile {
        student: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        goal: Option<String>,
        #[arg(long)]
        brainlift: Option<bool>,
    },
    /// Goal status of every student for a day (default today)
    Goals {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// History entries of one student, newest first
    History { student: String },
    /// Run periodic maintenance and the admin endpoint until Ctrl+C
    Serve,
}

fn init_logging(json: bool) {
    // 日志初始化前已加载 .env，RUST_LOG 可在其中配置
    if json {
        common::utils::logging::init_logging_json();
    } else {
        common::utils::logging::init_logging_default();
    }
    info!(service = "store", event = "logger_init", "tracing subscriber initialized");
}

fn main() -> ExitCode {
    dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    // 服务实例上下文（不含敏感信息）
    let service_id = Uuid::new_v4();
    let pid = std::process::id();
    let version = env!("CARGO_PKG_VERSION");

    // Panic 钩子：捕获异常并输出错误日志
    std::panic::set_hook(Box::new(move |info| {
        error!(
            service = "store",
            event = "panic",
            %service_id,
            pid,
            message = %info,
            "unhandled panic occurred"
        );
    }));

    let cfg = match configs::AppConfig::load_and_validate() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(service = "store", event = "config_invalid", error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(service = "store", event = "runtime_build_failed", error = %e, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    info!(
        service = "store",
        event = "start",
        %service_id,
        pid,
        version,
        backend = %cfg.store.backend_kind,
        "store starting"
    );

    let result = rt.block_on(async move {
        let store = Arc::new(KvStore::new(cfg.store.clone()));
        store.initialize().await;
        let outcome = run_command(&store, &cfg.admin.addr, cli.command).await;
        // 退出前把降级期间的写入尽量落盘
        let report = store.flush().await;
        if report.pending > 0 {
            warn!(service = "store", event = "pending_on_exit", pending = report.pending, "degraded writes not persisted");
        }
        outcome
    });

    match result {
        Ok(()) => {
            info!(service = "store", event = "stop", %service_id, pid, "store stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(service = "store", event = "command_failed", error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("not valid JSON: {raw}"))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_command(store: &Arc<KvStore>, admin_addr: &str, command: Command) -> Result<()> {
    match command {
        Command::Get { key } => match store.get(&key).await {
            Some(record) => print_json(&record)?,
            None => return Err(anyhow!("no record at {key}")),
        },
        Command::Set { key, value, ttl } => {
            store.set(&key, parse_json(&value)?, ttl).await;
        }
        Command::Merge { key, patch, ttl } => {
            let patch = parse_json(&patch)?;
            if !patch.is_object() {
                return Err(anyhow!("merge patch must be a JSON object"));
            }
            print_json(&store.merge_update(&key, patch, ttl).await)?;
        }
        Command::Delete { key } => store.delete(&key).await,
        Command::List { prefix } => {
            let mut rows = store.list_by_prefix(&prefix).await;
            rows.sort_by(|a, b| a.0.cmp(&b.0));
            for (key, record) in rows {
                println!("{key}\t{record}");
            }
        }
        Command::Flush => {
            let report = store.flush().await;
            println!(
                "replayed={} dropped={} purged={} pending={}",
                report.replayed, report.dropped, report.purged, report.pending
            );
        }
        Command::Profile { student, name, email, goal, brainlift } => {
            let student = StudentId::parse(&student)?;
            let update = ProfileUpdate { name, email, daily_goal: goal, brainlift_completed: brainlift };
            let profile = if update.is_empty() {
                profile_service::get_profile(store, &student).await
            } else {
                profile_service::update_profile(store, &student, &update).await?
            };
            print_json(&profile)?;
        }
        Command::Goals { date } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            for (student, status) in goal_service::list_goal_statuses_for_date(store, date).await {
                let mark = if status.completed { "x" } else { " " };
                println!("[{mark}] {student}\t{}", status.goal);
            }
        }
        Command::History { student } => {
            let student = StudentId::parse(&student)?;
            print_json(&history_service::list_history(store, &student).await)?;
        }
        Command::Serve => serve(Arc::clone(store), admin_addr).await?,
    }
    Ok(())
}

async fn serve(store: Arc<KvStore>, admin_addr: &str) -> Result<()> {
    let interval = store.config().flush_interval();
    let maintenance = spawn_maintenance(Arc::clone(&store), interval);
    let admin = common::admin_http::spawn_admin_server(admin_addr, storage::observability::encode_metrics).await?;
    info!(
        service = "store",
        event = "serving",
        backend = %store.backend_kind().await,
        admin_addr,
        "maintenance and admin endpoint running"
    );

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl+C")?;
    info!(service = "store", event = "shutdown_signal", "received Ctrl+C, shutting down");
    maintenance.stop();
    admin.abort();
    Ok(())
}
