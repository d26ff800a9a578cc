use std::future;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dsrepo::config::Config;
use dsrepo::server::Router;
use dsrepo::Node;
use log::{error, info, warn};
use tokio::signal;

#[derive(Parser, Debug)]
#[command(author, version, about = "dsrepo node daemon", long_about = None)]
struct Args {
    /// Repo directory.
    #[arg(short, long, env = "DSREPO_PATH", default_value = "./dsrepo")]
    repo: PathBuf,

    #[arg(long)]
    rpc_port: Option<u16>,

    #[arg(long)]
    p2p_port: Option<u16>,

    /// Do not listen for or dial peers.
    #[arg(long)]
    offline: bool,

    /// Do not build or maintain a search index.
    #[arg(long)]
    no_search: bool,

    /// Peer addresses to connect to on startup.
    #[arg(long = "connect")]
    connect: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("dsrepo=info")).init();
    let args = Args::parse();

    let mut config = Config::load_or_init(&args.repo)?;
    if let Some(port) = args.rpc_port {
        config.rpc.port = port;
    }
    if let Some(port) = args.p2p_port {
        config.p2p.port = port;
    }
    if args.offline {
        config.p2p.enabled = false;
    }
    if args.no_search {
        config.search.enabled = false;
    }

    let node = Arc::new(Node::open(&args.repo, &config).await?);
    let network = node.network().clone();
    info!("peer id {}", network.peer_id());

    if config.p2p.enabled {
        let listener = network.bind(&format!("0.0.0.0:{}", config.p2p.port)).await?;
        let serving = network.clone();
        tokio::spawn(async move {
            if let Err(e) = serving.serve(listener).await {
                error!("p2p listener failed: {}", e);
            }
        });
        for addr in &args.connect {
            match network.connect(addr).await {
                Ok(p) => info!("connected to {} at {}", p.peername, addr),
                Err(e) => warn!("connecting to {}: {}", addr, e),
            }
        }
    }

    let router = Router::new(node.clone());
    let rpc_addr = format!("127.0.0.1:{}", config.rpc.port);
    let rpc_enabled = config.rpc.enabled;

    tokio::select! {
        res = async {
            if rpc_enabled {
                router.listen(&rpc_addr).await
            } else {
                future::pending().await
            }
        } => {
            if let Err(e) = res {
                error!("rpc server failed: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
            network.go_offline();
        }
    }

    Ok(())
}
