use anyhow::Result;
use mathlearn::cli;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
