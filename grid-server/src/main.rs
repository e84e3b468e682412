use std::sync::Arc;

use grid_core::coordinator::Coordinator;
use grid_server::grpc::proto::coordinator_server::CoordinatorServer;
use grid_server::grpc::GridService;
use tonic::transport::Server;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let addr = parse_bind_addr().parse()?;

    let coordinator = Arc::new(Coordinator::new());

    tracing::info!("grid coordinator gRPC server listening on {}", addr);

    let service = GridService { coordinator };

    Server::builder()
        .add_service(CoordinatorServer::new(service))
        .serve(addr)
        .await?;

    Ok(())
}

/// Parse the bind address from `--addr <addr>` CLI arg or `GRID_COORDINATOR_ADDR`
/// env var, falling back to a fixed default.
fn parse_bind_addr() -> String {
    let args: Vec<String> = std::env::args().collect();
    if let Some(addr) = args
        .windows(2)
        .find(|w| w[0] == "--addr")
        .map(|w| w[1].clone())
    {
        return addr;
    }
    std::env::var("GRID_COORDINATOR_ADDR").unwrap_or_else(|_| "0.0.0.0:50151".to_string())
}
