use clap::{Args, Parser, Subcommand};
use lanshare::{setup_logging, Config, Node, PeerAddr, Result, ShareError};
use std::path::PathBuf;
use tokio::time::{sleep, Duration};

#[derive(Parser)]
#[command(name = "lanshare")]
#[command(about = "Serverless LAN file sharing over UDP gossip and TCP transfer")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct NetworkArgs {
    /// Host to bind and advertise
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// UDP discovery port (the transfer endpoint uses port + 1)
    #[arg(short, long, default_value = "9001")]
    port: u16,
    /// Bootstrap peer as host:port, repeatable
    #[arg(short, long)]
    bootstrap: Vec<String>,
    /// Directory downloaded files are written to
    #[arg(short, long, default_value = "downloads")]
    downloads: PathBuf,
    /// Disable the local broadcast probe
    #[arg(long)]
    no_broadcast: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node until interrupted, optionally sharing files at startup
    Start {
        #[command(flatten)]
        network: NetworkArgs,
        /// Files to share immediately
        #[arg(short, long)]
        share: Vec<PathBuf>,
    },
    /// Join the network, wait for gossip, download one file, exit
    Download {
        #[command(flatten)]
        network: NetworkArgs,
        /// Content hash of the file to fetch
        #[arg(long)]
        hash: String,
        /// Name to save under (defaults to the advertised name)
        #[arg(long)]
        save_as: Option<String>,
    },
    /// Join the network, wait for gossip, print the file table
    List {
        #[command(flatten)]
        network: NetworkArgs,
    },
}

fn parse_bootstrap(entries: &[String]) -> Result<Vec<PeerAddr>> {
    entries
        .iter()
        .map(|entry| {
            let (host, port) = entry.rsplit_once(':').ok_or_else(|| {
                ShareError::Config(format!("Bootstrap must be host:port, got '{}'", entry))
            })?;
            let port = port
                .parse()
                .map_err(|_| ShareError::Config(format!("Invalid port in '{}'", entry)))?;
            Ok(PeerAddr::new(host, port))
        })
        .collect()
}

fn build_config(network: NetworkArgs) -> Result<Config> {
    Ok(Config {
        host: network.host,
        port: network.port,
        bootstrap_nodes: parse_bootstrap(&network.bootstrap)?,
        enable_broadcast: !network.no_broadcast,
        downloads_dir: network.downloads,
        ..Config::default()
    })
}

// How long a one-shot command waits for hello responses to trickle in.
const GOSSIP_SETTLE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { network, share } => {
            let mut node = Node::start(build_config(network)?).await?;

            for path in share {
                let hash = node.share_file(&path).await?;
                println!("Sharing {} -> {}", path.display(), hash);
            }

            tokio::signal::ctrl_c().await?;
            node.stop().await?;
        }
        Commands::Download {
            network,
            hash,
            save_as,
        } => {
            let mut node = Node::start(build_config(network)?).await?;
            sleep(GOSSIP_SETTLE).await;

            match node.request_file(&hash, save_as.as_deref()).await {
                Ok(path) => println!("Downloaded to {}", path.display()),
                Err(e) => {
                    node.stop().await?;
                    return Err(e);
                }
            }
            node.stop().await?;
        }
        Commands::List { network } => {
            let mut node = Node::start(build_config(network)?).await?;
            sleep(GOSSIP_SETTLE).await;

            let entries = node.file_table().await;
            if entries.is_empty() {
                println!("No files discovered ({} peers)", node.peer_count().await);
            } else {
                println!("{:<40} {:<64} peers", "name", "hash");
                for entry in entries {
                    println!("{:<40} {:<64} {}", entry.name, entry.hash, entry.peer_count);
                }
            }
            node.stop().await?;
        }
    }

    Ok(())
}
