use clap::Parser;
use image_registry_operator::coordinator::{Args, Coordinator};
use image_registry_operator::operator::StandbyOperator;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("Starting cluster image registry operator");

    let operator = StandbyOperator::new(args.kubeconfig.clone());
    if let Err(e) = Coordinator::new().run(&args, &operator).await {
        error!(error = %format!("{:#}", e), "Operator exited with error");
        return Err(e);
    }

    info!("Operator shut down gracefully");
    Ok(())
}
