#[tokio::main]
async fn main() {
    if let Err(e) = wa_gateway_lib::run().await {
        tracing::error!("wa-gateway exited with error: {}", e);
        eprintln!("wa-gateway: {}", e);
        std::process::exit(1);
    }
}
