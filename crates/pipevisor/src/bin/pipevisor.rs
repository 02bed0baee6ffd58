//! Pipevisor - run the pipeline engine
//!
//! Usage:
//!   pipevisor -f pipeline.conf                 # Run a pipeline from a file
//!   pipevisor -e 'input { stdin { } }'         # Run an inline pipeline
//!   pipevisor -t -f pipeline.conf              # Check the config and exit
//!   pipevisor --path.settings /etc/pipevisor   # Use another settings dir
//!   pipevisor --help                           # Show every flag

use pipevisor::pipeline::ServicePipelineFactory;
use pipevisor::Runner;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn,pipevisor=trace,pipevisor_service=trace"),
    )
    .target(env_logger::Target::Stderr)
    .init();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    })?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut runner = Runner::new(ServicePipelineFactory::new().with_shutdown_signal(shutdown_rx));
    let code = runner.run(&args).await;
    std::process::exit(code);
}
