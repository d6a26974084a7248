use std::process::ExitCode;
use std::sync::Arc;

use clap::{CommandFactory, Parser};

use canopy::cli::{self, Action, Cli};
use canopy::config::{schema, Config};
use canopy::lifecycle::Shutdown;
use canopy::net::ProxyServer;
use canopy::observability::logging;
use canopy::tls::ContextSet;

#[tokio::main]
async fn main() -> ExitCode {
    let action = match cli::evaluate(Cli::parse()) {
        Ok(action) => action,
        Err(err) => {
            eprintln!("canopy: {err}");
            return ExitCode::FAILURE;
        }
    };

    match action {
        Action::Version => {
            println!("{}", cli::version_line());
            ExitCode::SUCCESS
        }
        Action::DefaultConfig => {
            println!("{}", schema::default_json());
            ExitCode::SUCCESS
        }
        Action::Usage => {
            let _ = Cli::command().print_help();
            ExitCode::SUCCESS
        }
        Action::Run(config) => match serve(*config).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("canopy: {err}");
                ExitCode::FAILURE
            }
        },
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    logging::init(&config.log);
    let config = Arc::new(config);

    tracing::info!(
        version = cli::version_line(),
        workers = config.workers,
        worker = config.is_worker,
        contexts = config.contexts.len(),
        "canopy starting"
    );

    let contexts = Arc::new(ContextSet::from_config(&config)?);
    let server = ProxyServer::new(Arc::clone(&config), contexts)?;

    let shutdown = Arc::new(Shutdown::new());
    let trigger = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.trigger();
        }
    });

    server.run(&shutdown).await?;
    tracing::info!("shutdown complete");
    Ok(())
}
