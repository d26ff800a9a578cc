use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dsrepo::params::{
    ConnectParams, ListParams, LogParams, PeerInfoParams, PeerRefsParams, SaveParams,
};
use dsrepo::{
    sdk, Dataset, DatasetRef, DatasetRequests, HistoryRequests, PeerRequests, ProfileId,
    ProfileRequests, RepoRequests, SearchParams, SearchRequests,
};
use serde::Serialize;

#[derive(Parser)]
#[command(author, version, about = "dsrepo command line", long_about = None)]
struct Cli {
    /// Repo directory, used when no daemon is reachable.
    #[arg(short, long, env = "DSREPO_PATH", default_value = "./dsrepo")]
    repo: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// List known peers.
    Peers {
        #[arg(long, default_value_t = 25)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Show a peer by peername or profile id.
    Peer { peer: String },
    /// List a connected peer's datasets.
    Refs {
        peer_id: String,
        #[arg(long, default_value_t = 25)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// List connected peers.
    Connected {
        #[arg(long, default_value_t = 25)]
        limit: usize,
    },
    /// Connect to a peer's p2p address.
    Connect { address: String },
    /// Show a dataset's version history.
    Log {
        dataset: String,
        #[arg(long, default_value_t = 25)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// List local datasets.
    List {
        peername: Option<String>,
        #[arg(long, default_value_t = 25)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    Get { dataset: String },
    /// Save a new dataset version from a JSON file or flags.
    Save {
        name: String,
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "keyword")]
        keywords: Vec<String>,
        #[arg(short, long)]
        message: Option<String>,
    },
    Remove { dataset: String },
    Search {
        query: String,
        #[arg(long, default_value_t = 25)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Show this node's profile.
    Profile,
    /// Change this node's peername.
    SetPeername { peername: String },
    /// Show the refstore event log.
    Events {
        #[arg(long, default_value_t = 25)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// List refs whose content is missing; with --prune, delete them.
    Dangling {
        #[arg(long)]
        prune: bool,
    },
    /// Rebuild the search index.
    Reindex,
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("dsrepo=warn")).init();
    let cli = Cli::parse();
    let requests = sdk::new(&cli.repo).await?;
    let requests = requests.as_ref();

    match cli.command {
        Commands::Peers { limit, offset } => {
            print(&PeerRequests::list(requests, &ListParams::new(limit, offset)).await?)?;
        }
        Commands::Peer { peer } => {
            let params = match ProfileId::decode(&peer) {
                Ok(id) => PeerInfoParams {
                    peername: String::new(),
                    profile_id: Some(id),
                },
                Err(_) => PeerInfoParams {
                    peername: peer,
                    profile_id: None,
                },
            };
            print(&requests.info(&params).await?)?;
        }
        Commands::Refs { peer_id, limit, offset } => {
            let refs = requests
                .get_references(&PeerRefsParams { peer_id, limit, offset })
                .await?;
            for r in refs {
                println!("{}", r);
            }
        }
        Commands::Connected { limit } => {
            print(&requests.connected_profiles(limit).await?)?;
        }
        Commands::Connect { address } => {
            print(&requests.connect_to_peer(&ConnectParams { address }).await?)?;
        }
        Commands::Log { dataset, limit, offset } => {
            let params = LogParams {
                list: ListParams::new(limit, offset),
                dataset_ref: DatasetRef::parse(&dataset)?,
            };
            for r in requests.log(&params).await? {
                let msg = r
                    .dataset
                    .as_ref()
                    .map(|ds| ds.commit_message.clone())
                    .unwrap_or_default();
                println!("{}\t{}", r.path, msg);
            }
        }
        Commands::List { peername, limit, offset } => {
            let params = ListParams {
                peername: peername.unwrap_or_default(),
                limit,
                offset,
            };
            for r in DatasetRequests::list(requests, &params).await? {
                println!("{}", r);
            }
        }
        Commands::Get { dataset } => {
            print(&requests.get(&DatasetRef::parse(&dataset)?).await?)?;
        }
        Commands::Save {
            name,
            file,
            title,
            description,
            keywords,
            message,
        } => {
            let mut dataset: Dataset = match file {
                Some(path) => serde_json::from_slice(&std::fs::read(path)?)?,
                None => Dataset::default(),
            };
            if let Some(title) = title {
                dataset.title = title;
            }
            if let Some(description) = description {
                dataset.description = description;
            }
            dataset.keywords.extend(keywords);
            if let Some(message) = message {
                dataset.commit_message = message;
            }
            let saved = requests.save(&SaveParams { name, dataset }).await?;
            println!("{}", saved);
        }
        Commands::Remove { dataset } => {
            let removed = requests.remove(&DatasetRef::parse(&dataset)?).await?;
            println!("removed {}", removed);
        }
        Commands::Search { query, limit, offset } => {
            let results = requests
                .search(&SearchParams {
                    q: query,
                    limit,
                    offset,
                })
                .await?;
            for r in &results.refs {
                let title = r.dataset.as_ref().map(|ds| ds.title.as_str()).unwrap_or("");
                println!("{}\t{}", r, title);
            }
            for f in &results.failures {
                eprintln!("warning: {}: {}", f.dataset_ref, f.error);
            }
        }
        Commands::Profile => {
            print(&requests.get_profile().await?)?;
        }
        Commands::SetPeername { peername } => {
            let mut profile = requests.get_profile().await?;
            profile.peername = peername;
            print(&requests.set_profile(&profile).await?)?;
        }
        Commands::Events { limit, offset } => {
            for e in requests.events(&ListParams::new(limit, offset)).await? {
                println!("{}\t{:?}\t{}", e.timestamp.to_rfc3339(), e.kind, e.dataset_ref);
            }
        }
        Commands::Dangling { prune } => {
            let refs = if prune {
                requests.prune_dangling_refs().await?
            } else {
                requests.dangling_refs().await?
            };
            for r in refs {
                println!("{}{}", if prune { "pruned " } else { "" }, r);
            }
        }
        Commands::Reindex => {
            println!("indexed {} refs", requests.reindex().await?);
        }
    }

    Ok(())
}
