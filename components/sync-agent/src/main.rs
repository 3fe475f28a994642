use sync_agent::cli;

#[tokio::main]
async fn main() {
    let code = cli::cli::run().await;
    std::process::exit(code);
}
