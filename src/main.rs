use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc;

use autoglm::agent_engine::history::SessionRecorder;
use autoglm::config::{self, AppConfig};
use autoglm::device::remote::RemoteDevice;
use autoglm::device::Device;
use autoglm::llm::registry::ProviderRegistry;
use autoglm::{init_tracing, AutoGlmResult, DualModelAgent, PhoneAgent};

/// Exit status for a run stopped with Ctrl-C (128 + SIGINT).
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser)]
#[command(name = "autoglm", version, about = "Drive an Android phone with an LLM agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one task to completion, printing events as JSON lines.
    Run {
        task: String,
        /// Config file; defaults to config.toml beside the binary or in the working directory.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Use the decision/vision model pair.
        #[arg(long)]
        dual: bool,
        #[arg(long)]
        max_steps: Option<u32>,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();
    // .env is optional
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run {
            task,
            config,
            dual,
            max_steps,
        } => run(task, config, dual, max_steps).await,
    };
    let code = exit_code(&result);
    if code != 0 {
        std::process::exit(code);
    }
}

fn exit_code(result: &AutoGlmResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) if e.is_cancelled() => {
            tracing::info!("run stopped by user");
            EXIT_CANCELLED
        }
        Err(e) => {
            tracing::error!(error = %e, "autoglm failed");
            1
        }
    }
}

async fn run(
    task: String,
    config_path: Option<PathBuf>,
    dual: bool,
    max_steps: Option<u32>,
) -> AutoGlmResult<()> {
    let mut cfg: AppConfig = match config_path {
        Some(path) => config::load_config_from(&path)?,
        None => config::load_config()?,
    };
    if let Some(n) = max_steps {
        cfg.agent.max_steps = n;
        cfg.dual_model.max_steps = n;
    }
    let registry = ProviderRegistry::from_config(&cfg);
    let device: Arc<dyn Device> = Arc::new(RemoteDevice::from_config(&cfg.device));
    let recorder = SessionRecorder::new();
    tracing::info!(
        session = %recorder.session_id,
        path = %recorder.path().display(),
        "recording session"
    );

    if dual || cfg.dual_model.enabled {
        let mut agent = DualModelAgent::from_config(&cfg, &registry, device)?;
        let cancel = agent.cancel_handle();
        let (tx, rx) = mpsc::channel(64);
        let printer = tokio::spawn(print_events(rx, recorder));
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
        let outcome = agent.run(&task, tx).await;
        ctrl_c.abort();
        let _ = printer.await;
        outcome.map(|o| tracing::info!(success = o.success, message = %o.message, "done"))
    } else {
        let mut agent = PhoneAgent::from_config(&cfg, &registry, device)?;
        let cancel = agent.cancel_handle();
        let (tx, rx) = mpsc::channel(64);
        let printer = tokio::spawn(print_events(rx, recorder));
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
        let outcome = agent.stream(&task, tx).await;
        ctrl_c.abort();
        let _ = printer.await;
        outcome.map(|o| tracing::info!(success = o.success, message = %o.message, "done"))
    }
}

async fn print_events<E>(mut rx: mpsc::Receiver<E>, recorder: SessionRecorder)
where
    E: Serialize + Send + 'static,
{
    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "failed to encode event"),
        }
        if let Err(e) = recorder.record(&event) {
            tracing::warn!(error = %e, "failed to record event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoglm::AutoGlmError;

    #[test]
    fn cancelled_run_has_its_own_exit_code() {
        assert_eq!(exit_code(&Ok(())), 0);
        assert_eq!(exit_code(&Err(AutoGlmError::Cancelled)), EXIT_CANCELLED);
        assert_eq!(
            exit_code(&Err(AutoGlmError::Device("adb gone".into()))),
            1
        );
    }
}
