use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    birdboard_cli::cli::run().await
}
