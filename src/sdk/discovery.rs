use std::env;
use std::path::Path;
use std::sync::Arc;

use log::{info, warn};

use crate::config::Config;
use crate::node::Node;
use crate::sdk::Client;
use crate::{Requests, Result};

/// Environment variable naming a daemon's RPC address.
pub const RPC_ADDR_ENV: &str = "DSREPO_RPC_ADDR";

/// Picks how requests are served, once, for the life of the handle.
///
/// 1. If `DSREPO_RPC_ADDR` is set and a daemon answers there, requests go
///    over RPC.
/// 2. Otherwise the repo at `repo_path` is opened in-process.
///
/// ```no_run
/// use dsrepo::sdk;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let requests = sdk::new("./dsrepo").await?;
///     Ok(())
/// }
/// ```
pub async fn new<P: AsRef<Path>>(repo_path: P) -> Result<Arc<dyn Requests>> {
    let addr = env::var(RPC_ADDR_ENV).unwrap_or_default();
    if !addr.is_empty() {
        match Client::connect(&addr).await {
            Ok(client) => {
                info!("using daemon at {}", addr);
                return Ok(Arc::new(client));
            }
            Err(e) => warn!("daemon at {} unavailable, opening repo directly: {}", addr, e),
        }
    }
    local(repo_path).await
}

/// Opens the repo at `repo_path` in-process, creating its config on first use.
pub async fn local<P: AsRef<Path>>(repo_path: P) -> Result<Arc<dyn Requests>> {
    let config = Config::load_or_init(&repo_path)?;
    Ok(Arc::new(Node::open(repo_path, &config).await?))
}
