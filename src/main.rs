use clap::{Parser, Subcommand};
use runsync_lib::commands::{self, FolderKind};
use runsync_lib::logging::{log_dir, LogConfig, SizeRotatingWriter};
use runsync_lib::storage::{irods::REQUIRED_EXECUTABLES, StoreType};
use runsync_lib::{default_config_dir, AppState};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "runsync", about = "Run folder completion and manifest verification")]
struct Cli {
    /// 配置目录（默认为系统配置目录下的 runsync）
    #[arg(long, global = true, env = "RUNSYNC_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mark new run folders as seen, then finalize those that are done and at rest
    Sweep {
        /// Local source root containing run folders
        #[arg(long)]
        root: PathBuf,
        /// Remote collection mirroring the source root
        #[arg(long)]
        target: String,
        #[arg(long, value_enum, default_value_t = FolderKind::RunFolder)]
        kind: FolderKind,
    },
    /// Record a created or updated data object
    Event {
        #[arg(long)]
        root: PathBuf,
        /// Remote path of the data object
        #[arg(long)]
        target: String,
        /// Local path of the file
        #[arg(long)]
        path: PathBuf,
    },
    /// Show the stored state of a run folder collection
    Status {
        #[arg(long)]
        collection: String,
    },
    /// Check that the external tools used by the store are installed
    CheckTools,
    /// Show recent finalization attempts
    History {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

/// 控制台日志层（每个 subscriber 各自构建一份）
fn console_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
}

/// 初始化日志系统
fn init_logging(config_dir: &Path) {
    let config = LogConfig::load(config_dir);

    if !config.enabled {
        // 日志已禁用，只初始化一个空的 subscriber
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
        return;
    }

    let mut env_filter = EnvFilter::from_default_env().add_directive(config.tracing_level().into());
    for directive in ["opendal=warn", "sqlx=warn"] {
        if let Ok(d) = directive.parse() {
            env_filter = env_filter.add_directive(d);
        }
    }

    match SizeRotatingWriter::new(&log_dir(config_dir), config.max_size_mb) {
        Ok(file_writer) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);

            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(console_layer())
                .try_init();
        }
        Err(e) => {
            // 文件日志创建失败，回退到控制台
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer())
                .try_init();
            tracing::warn!("无法创建日志文件: {}", e);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let state = AppState::new(cli.config_dir).await?;

    let code = match cli.command {
        Command::Sweep { root, target, kind } => {
            let engine = state.engine()?;
            let report = commands::sweep::run_sweep(&state, &engine, &root, &target, kind).await?;
            commands::sweep::print_report(&report);
            if report.has_failures() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Command::Event { root, target, path } => {
            let engine = state.engine()?;
            commands::event::handle_event(&engine, path, root, target).await?;
            ExitCode::SUCCESS
        }
        Command::Status { collection } => {
            let engine = state.engine()?;
            commands::status::show_status(&engine, &collection).await?;
            ExitCode::SUCCESS
        }
        Command::CheckTools => {
            if !state.config.look_for_executables || state.store_config.typ != StoreType::Irods {
                println!("tool check skipped");
                ExitCode::SUCCESS
            } else {
                let missing = commands::tools::check_executables(&REQUIRED_EXECUTABLES);
                if missing.is_empty() {
                    println!("all tools found");
                    ExitCode::SUCCESS
                } else {
                    println!("missing tools: {}", missing.join(", "));
                    ExitCode::FAILURE
                }
            }
        }
        Command::History { limit } => {
            commands::history::show_history(&state, limit).await?;
            ExitCode::SUCCESS
        }
    };

    state.cleanup().await;
    Ok(code)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_dir = cli.config_dir.clone().unwrap_or_else(default_config_dir);
    init_logging(&config_dir);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_falls_back_to_console() {
        let dir = tempfile::tempdir().unwrap();
        // logs 路径被普通文件占用，无法创建日志目录
        std::fs::write(log_dir(dir.path()), b"").unwrap();
        assert!(SizeRotatingWriter::new(&log_dir(dir.path()), 1).is_err());
        init_logging(dir.path());
        tracing::info!("console only");
    }

    #[test]
    fn test_init_logging_with_file_layer() {
        let dir = tempfile::tempdir().unwrap();
        init_logging(dir.path());
        assert!(log_dir(dir.path()).is_dir());
    }

    #[test]
    fn test_cli_parses_sweep() {
        let cli = Cli::try_parse_from([
            "runsync", "sweep", "--root", "/data/runs", "--target", "/zone/runs", "--kind", "demux",
        ])
        .unwrap();
        match cli.command {
            Command::Sweep { kind, .. } => assert_eq!(kind, FolderKind::Demux),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
