#[tokio::main]
async fn main() -> anyhow::Result<()> {
    thoughtstream_lib::run().await
}
