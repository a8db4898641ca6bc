use clap::Parser;
use taskherd::cli;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::Cli::parse();

    if let Err(e) = cli::run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
