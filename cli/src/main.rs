use clap::Parser;
mod commands;
use commands::cli;
use harvest_core::config::{load_default, load_from_path, AppConfig, LoggingConfig};
use harvest_core::error::{self, ErrorCode};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

async fn real_main() -> Result<i32, error::CliError> {
    let args = cli::Args::parse();
    let cfg = load_config(args.config.as_deref())
        .map_err(|e| error::CliError::Config(format!("{e:#}")))?;
    init_tracing(&cfg.logging).map_err(error::CliError::Command)?;

    match args.command {
        cli::Commands::Collect(collect_args) => {
            commands::collect::run_collect(collect_args, cfg).await
        }
        cli::Commands::Status(status_args) => commands::status::run_status(status_args, &cfg),
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<AppConfig> {
    let Some(path) = path else {
        return load_default();
    };
    let mut cfg = load_from_path(path)?;
    harvest_core::config::apply_env_overrides(&mut cfg)?;
    cfg.validate()?;
    Ok(cfg)
}

fn exit_code_for_error(e: &error::CliError) -> i32 {
    // 0: success
    // 2: batch finished with failed sources (returned as a normal exit code)
    // 11: config error
    // 20: IO / source list error
    // 50: internal/uncategorized
    match e {
        error::CliError::Config(_) => 11,
        error::CliError::Orchestrator(oe) => match oe.error_code() {
            ErrorCode::ConfigError => 11,
            ErrorCode::SourceListError | ErrorCode::IoError => 20,
            _ => 50,
        },
        error::CliError::Scheduler(_) => 50,
        error::CliError::Io(_) => 20,
        error::CliError::Command(_) => 20,
        error::CliError::Anyhow(_) => 50,
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<(), String> {
    if !logging.enabled {
        return Ok(());
    }

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(logging.level.clone()).map_err(|e| e.to_string())?,
    };

    let mut maybe_writer = None;

    if logging.file {
        let dir = match logging
            .directory
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(d) => std::path::PathBuf::from(d),
            None => std::env::temp_dir().join("harvest"),
        };

        std::fs::create_dir_all(&dir).map_err(|e| format!("create log dir failed: {e}"))?;
        let file_name = format!("harvest.{}.log", std::process::id());
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        maybe_writer = Some(non_blocking);
    }

    if !logging.console && maybe_writer.is_none() {
        return Err("logging disabled for both console and file".to_string());
    }

    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
    });

    let file_layer = maybe_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::error::{OrchestratorError, SchedulerError};
    use std::path::PathBuf;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for_error(&error::CliError::Config("x".into())), 11);
        let source_list = OrchestratorError::SourceList {
            path: PathBuf::from("s.json"),
            source: anyhow::anyhow!("missing"),
        };
        assert_eq!(exit_code_for_error(&source_list.into()), 20);
        let setup = OrchestratorError::CollectorSetup(anyhow::anyhow!("bad kind"));
        assert_eq!(exit_code_for_error(&setup.into()), 11);
        assert_eq!(
            exit_code_for_error(&OrchestratorError::NotInitialized.into()),
            50
        );
        assert_eq!(
            exit_code_for_error(&SchedulerError::ShutDown.into()),
            50
        );
        let io = std::io::Error::other("disk");
        assert_eq!(exit_code_for_error(&io.into()), 20);
    }

    #[test]
    fn test_load_config_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.toml");
        std::fs::write(&path, "[scheduler]\nmax_concurrent = 7\n").unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        if std::env::var("HARVEST_MAX_CONCURRENT").is_err() {
            assert_eq!(cfg.scheduler.max_concurrent, 7);
        }

        std::fs::write(&path, "[scheduler]\nmax_concurrent = 0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
