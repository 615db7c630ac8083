//! Bindery operator entrypoint (§A.6): a small `clap` CLI wrapping two
//! subcommands, mirroring the teacher's `shipcat <verb>` binary shape.

use clap::{Parser, Subcommand};
use kube::Client;

use bindery_operator::config::OperatorConfig;
use bindery_operator::context::State;
use bindery_operator::error::Result;
use bindery_operator::{crdgen, health, reconcilers, telemetry};

#[derive(Parser)]
#[command(name = "bindery-operator", about = "Kubernetes operator for game-module capability resolution")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the five reconcilers and the admin HTTP server until terminated.
    Run,
    /// Prints every CRD this operator owns as a multi-document YAML stream.
    Crdgen,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Crdgen => {
            crdgen::print_all();
            Ok(())
        }
        Command::Run => run().await,
    }
}

async fn run() -> Result<()> {
    telemetry::init();

    let config = OperatorConfig::from_env()?;
    tracing::info!(
        label_prefix = %config.label_prefix,
        admin_port = config.admin_port,
        watch_namespace = config.watch_namespace.as_deref().unwrap_or("<all>"),
        concurrency = config.concurrency,
        "starting bindery-operator"
    );

    let client = Client::try_default().await?;
    let state = State::new(config.clone());

    let admin_port = config.admin_port;
    let admin_state = state.clone();
    tokio::select! {
        _ = reconcilers::run_all(client, state) => {
            tracing::warn!("all reconcilers exited");
        }
        result = health::run(admin_state, admin_port) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "admin server exited with an error");
            }
        }
    }

    Ok(())
}
