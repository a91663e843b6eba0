use clap::Parser;
use gamegraph_server::{Cli, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::resolve(Cli::parse())?;
    gamegraph_server::init_tracing(config.log_filter.as_deref());
    gamegraph_server::serve(config).await
}
