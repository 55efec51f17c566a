use pyworker::{NativeInterpreter, WorkerConfig};
use tokio::io::{self, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "pyworker=info".to_string()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cfg = WorkerConfig::from_env_and_args();
    let interpreter = NativeInterpreter::from_config(&cfg)?;
    tracing::info!("pyworker starting (python={:?})", cfg.python_path);

    pyworker::serve(
        Box::new(interpreter),
        BufReader::new(io::stdin()),
        io::stdout(),
    )
    .await?;
    Ok(())
}
