//! SQL Governor - Main entry point.
//!
//! Serves the `run_sql` and `describe_schema` MCP tools, or runs one of the
//! one-shot CLI modes (`run`, `guard`, `describe`).

use clap::Parser;
use sql_governor::auth::BearerAuth;
use sql_governor::config::{Command, ConfigSource, GovernorConfig, TransportMode};
use sql_governor::db::SandboxPool;
use sql_governor::mcp::GovernorService;
use sql_governor::tools::{PgSchemaSource, RunSqlToolHandler, SchemaCache, guard};
use sql_governor::transport::{HttpTransport, StdioTransport, Transport};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber. Logs always go to stderr: stdout
/// carries the MCP stream or the one-shot output.
fn init_tracing(config: &GovernorConfig) {
    let level = if config.enable_logs {
        config.log_level.as_str()
    } else {
        "error"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // The env file must be applied before clap reads the environment
    let source = ConfigSource::detect(std::env::args_os().skip(1));
    source.load()?;

    let config = GovernorConfig::parse();
    init_tracing(&config);

    if let ConfigSource::EnvironmentAndFile(path) = &source {
        info!(path = %path.display(), "Loaded env file");
    }

    config.validate()?;

    match config.command() {
        Command::Guard { sql } => {
            let decision = guard(&sql, config.default_limit);
            println!("{}", serde_json::to_string_pretty(&decision)?);
            Ok(exit_code(decision.is_allowed()))
        }
        Command::Run { sql } => {
            let pool = SandboxPool::from_config(&config);
            let handler = RunSqlToolHandler::from_config(pool.clone(), &config);
            let result = handler.run_sql(&sql).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            pool.close().await;
            Ok(exit_code(result.is_ok()))
        }
        Command::Describe { refresh } => {
            let pool = SandboxPool::from_config(&config);
            let cache = SchemaCache::new(PgSchemaSource::from_config(pool.clone(), &config), None);
            let outcome = cache.get(refresh).await;
            pool.close().await;
            match outcome {
                Ok(text) => {
                    println!("{}", text);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    if let Some(suggestion) = e.suggestion() {
                        eprintln!("Suggestion: {}", suggestion);
                    }
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Serve => {
            serve(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn serve(config: &GovernorConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        transport = %config.transport,
        "Starting SQL Governor v{}",
        env!("CARGO_PKG_VERSION")
    );

    let pool = SandboxPool::from_config(config);
    let service = GovernorService::from_config(pool.clone(), config);

    info!(
        configured = pool.is_configured(),
        default_limit = config.default_limit,
        timeout_ms = config.timeout_ms,
        max_rows = config.max_rows,
        schema_tables = config.schema_tables().len(),
        "Execution sandbox ready"
    );

    let result = match config.transport {
        TransportMode::Stdio => {
            let transport = StdioTransport::new(service, pool);
            transport.run().await
        }
        TransportMode::Http => {
            info!(
                host = %config.http_host,
                port = config.http_port,
                endpoint = %config.mcp_endpoint,
                "Using HTTP transport"
            );
            let auth = BearerAuth::from_tokens(&config.auth_tokens)?;
            let transport = HttpTransport::new(
                service,
                pool,
                auth,
                &config.http_host,
                config.http_port,
                &config.mcp_endpoint,
            );
            transport.run().await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
