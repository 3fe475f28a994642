use service_wrapper::cli;

#[tokio::main]
async fn main() {
    // The CLI layer owns tracing setup and returns the exit code to hand back
    // to the service manager.
    let code = cli::cli::run().await;
    std::process::exit(code);
}
