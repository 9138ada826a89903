// HaloCME - Halo CME Interval Detection
// Binary entry point

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    halocme_lib::run().await
}
