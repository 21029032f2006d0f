use clap::Parser;
use log::info;
use server::network::{Server, ServerConfig};
use shared::DEFAULT_PORT;
use std::path::PathBuf;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Poem corpus, one line per line of verse
    #[clap(short, long, default_value = "AllSonnets.txt")]
    corpus: PathBuf,
    /// JSON file mapping poem numbers to header labels
    #[clap(short, long)]
    labels: Option<PathBuf>,
    /// Directory for per-user history files
    #[clap(short, long, default_value = ".")]
    index_dir: PathBuf,
}

/// Parses arguments, then runs the event loop until Ctrl+C.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        corpus_path: args.corpus,
        labels_path: args.labels,
        index_dir: args.index_dir,
    };

    let mut server = Server::bind(&config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    server.shutdown();
    Ok(())
}
