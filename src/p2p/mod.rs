//! Peer network: live connections to other nodes and cross-peer dataset
//! listing.

pub mod conn;
pub mod protocol;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, error, info, warn};
use tokio::net::TcpListener;

use crate::dataset::DatasetRef;
use crate::identity::{PeerId, ProfileId};
use crate::params::DatasetsListParams;
use crate::profile::Profile;
use crate::repo::Repo;
use crate::wire::LineConn;
use crate::{Error, Result};

pub use conn::{Connection, Direction};
pub use protocol::{handle_connection, Hello};

pub struct PeerNetwork {
    repo: Arc<Repo>,
    peer_id: PeerId,
    online: AtomicBool,
    listen_addr: RwLock<Option<SocketAddr>>,
    conns: RwLock<Vec<Arc<Connection>>>,
    next_conn_id: AtomicU64,
}

impl PeerNetwork {
    /// Creates an offline network for `repo`. Call [`bind`](Self::bind) to go
    /// online.
    pub fn new(repo: Arc<Repo>, peer_id: PeerId) -> Self {
        Self {
            repo,
            peer_id,
            online: AtomicBool::new(false),
            listen_addr: RwLock::new(None),
            conns: RwLock::new(Vec::new()),
            next_conn_id: AtomicU64::new(1),
        }
    }

    pub fn repo(&self) -> &Arc<Repo> {
        &self.repo
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn listen_addr(&self) -> Option<SocketAddr> {
        *self.listen_addr.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds the p2p listener and marks the node online.
    pub async fn bind(&self, addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        *self.listen_addr.write().unwrap_or_else(PoisonError::into_inner) = Some(local);
        self.online.store(true, Ordering::SeqCst);
        info!("p2p listening on {} as {}", local, self.peer_id.fmt_short());
        Ok(listener)
    }

    /// Accepts peer connections until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (socket, addr) = listener.accept().await?;
            debug!("inbound peer connection from {}", addr);
            let network = self.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(socket, network).await {
                    error!("peer connection error: {}", e);
                }
            });
        }
    }

    /// Drops every connection and stops reporting as online.
    pub fn go_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
        self.conns
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn hello(&self) -> Result<Hello> {
        let mut profile = self
            .repo
            .profile()?
            .ok_or_else(|| Error::Internal("repo has no profile".to_string()))?
            .public();
        profile.peer_ids = vec![self.peer_id.clone()];
        profile.addresses = self.listen_addr().map(|a| a.to_string()).into_iter().collect();
        Ok(Hello {
            peer_id: self.peer_id.clone(),
            profile,
        })
    }

    /// Dials `addr`, handshakes, and records the remote profile.
    pub async fn connect(&self, addr: &str) -> Result<Profile> {
        Ok(self.dial(addr).await?.profile().clone())
    }

    async fn dial(&self, addr: &str) -> Result<Arc<Connection>> {
        if !self.is_online() {
            return Err(Error::Network("node is offline".to_string()));
        }
        let mut stream = LineConn::connect(addr).await?;
        let remote: Hello = stream.call(protocol::CMD_HELLO, &self.hello()?).await?;
        if remote.peer_id == self.peer_id {
            return Err(Error::InvalidInput("cannot connect to self".to_string()));
        }
        self.register(remote, addr.to_string(), Direction::Outbound, Some(stream))
    }

    /// Connects to a peer we are not dialed out to, using addresses its
    /// profile advertised.
    async fn dial_peer(&self, peer: &PeerId) -> Result<Arc<Connection>> {
        let profile = self.repo.profiles().profile_for_peer(peer).map_err(|_| {
            Error::Network(format!("peer {} is not connected and has no known address", peer))
        })?;
        let mut last_err = None;
        for addr in &profile.addresses {
            match self.dial(addr).await {
                Ok(conn) if conn.peer_id() == peer => return Ok(conn),
                Ok(conn) => debug!("{} now belongs to {}", addr, conn.peer_id()),
                Err(e) => {
                    debug!("dialing {} at {}: {}", peer, addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Network(format!("could not reach peer {}", peer))))
    }

    pub(crate) fn accept_hello(&self, hello: Hello, remote_addr: String) -> Result<(Arc<Connection>, Hello)> {
        if hello.peer_id == self.peer_id {
            return Err(Error::InvalidInput("cannot connect to self".to_string()));
        }
        let reply = self.hello()?;
        let conn = self.register(hello, remote_addr, Direction::Inbound, None)?;
        Ok((conn, reply))
    }

    fn register(
        &self,
        hello: Hello,
        remote_addr: String,
        direction: Direction,
        stream: Option<LineConn>,
    ) -> Result<Arc<Connection>> {
        let mut profile = hello.profile;
        if !profile.peer_ids.contains(&hello.peer_id) {
            profile.peer_ids.push(hello.peer_id.clone());
        }
        self.repo.profiles().put_profile(&profile)?;

        let id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        let conn = Arc::new(Connection::new(
            id,
            hello.peer_id,
            profile,
            remote_addr,
            direction,
            stream,
        ));
        info!(
            "connected to {} ({:?}, {})",
            conn.peer_id().fmt_short(),
            direction,
            conn.profile().peername
        );
        self.conns
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(conn.clone());
        Ok(conn)
    }

    pub(crate) fn remove_conn(&self, id: u64) {
        self.conns
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|c| c.id() != id);
    }

    /// Pings every outbound connection and drops the ones whose remote has
    /// gone away. Returns how many were dropped.
    pub async fn drop_closed(&self) -> usize {
        let mut dropped = 0;
        for conn in self.conns() {
            if !conn.is_alive().await {
                debug!("dropping closed connection to {}", conn.peer_id().fmt_short());
                self.remove_conn(conn.id());
                dropped += 1;
            }
        }
        dropped
    }

    /// Drops every connection to `peer`, returning how many were closed.
    pub fn disconnect(&self, peer: &PeerId) -> usize {
        let mut conns = self.conns.write().unwrap_or_else(PoisonError::into_inner);
        let before = conns.len();
        conns.retain(|c| c.peer_id() != peer);
        before - conns.len()
    }

    /// Snapshot of open connections in the order they were opened. Entries
    /// may close before the caller uses them.
    pub fn conns(&self) -> Vec<Arc<Connection>> {
        self.conns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn conns_to_peer(&self, peer: &PeerId) -> Vec<Arc<Connection>> {
        self.conns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| c.peer_id() == peer)
            .cloned()
            .collect()
    }

    /// Up to `max` connected peers to try when reaching profile `id`.
    ///
    /// Peers already connected under that profile come first, in the order
    /// the profile store lists them, then any other open connection in open
    /// order. This prefers reusing sockets; it is not a latency ranking.
    pub fn closest_connected_peers(&self, id: &ProfileId, max: usize) -> Vec<PeerId> {
        let mut pids: Vec<PeerId> = Vec::new();
        if !self.is_online() {
            return pids;
        }

        if let Ok(ids) = self.repo.profiles().peer_ids(id) {
            for pid in ids {
                if pids.len() >= max {
                    return pids;
                }
                if !self.conns_to_peer(&pid).is_empty() && !pids.contains(&pid) {
                    pids.push(pid);
                }
            }
        }

        for conn in self.conns() {
            if pids.len() >= max {
                break;
            }
            if !pids.contains(conn.peer_id()) {
                pids.push(conn.peer_id().clone());
            }
        }
        pids
    }

    /// Distinct remote peers with an open connection.
    pub fn connected_peers(&self) -> Vec<PeerId> {
        let mut pids: Vec<PeerId> = Vec::new();
        for conn in self.conns() {
            if conn.peer_id() != &self.peer_id && !pids.contains(conn.peer_id()) {
                pids.push(conn.peer_id().clone());
            }
        }
        pids
    }

    /// Distinct remote profiles with an open connection.
    pub fn connected_profiles(&self) -> Vec<Profile> {
        let mut profiles: Vec<Profile> = Vec::new();
        for conn in self.conns() {
            if conn.peer_id() == &self.peer_id {
                continue;
            }
            if !profiles.iter().any(|p| p.id == conn.profile().id) {
                profiles.push(conn.profile().clone());
            }
        }
        profiles
    }

    /// Asks `peer` for a page of its named datasets. Results are also
    /// written to the ref cache.
    pub async fn request_datasets_list(
        &self,
        peer: &PeerId,
        params: DatasetsListParams,
    ) -> Result<Vec<DatasetRef>> {
        if !self.is_online() {
            return Err(Error::Network("node is offline".to_string()));
        }
        let conn = match self.conns_to_peer(peer).into_iter().find(|c| c.is_outbound()) {
            Some(conn) => conn,
            None => self.dial_peer(peer).await?,
        };

        match conn.call::<_, Vec<DatasetRef>>(protocol::CMD_DATASETS, &params).await {
            Ok(refs) => {
                if let Err(e) = self.repo.ref_cache().put_refs(&refs) {
                    warn!("caching refs from {}: {}", peer.fmt_short(), e);
                }
                Ok(refs)
            }
            Err(e) => {
                if matches!(e, Error::Network(_)) {
                    self.remove_conn(conn.id());
                }
                Err(e)
            }
        }
    }

    /// Serves a datasets list request from a peer.
    pub(crate) fn list_datasets(&self, params: DatasetsListParams) -> Result<Vec<DatasetRef>> {
        self.repo.refs(params.limit, params.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cafs::MapStore;
    use crate::identity::generate_keypair;
    use tempfile::{tempdir, TempDir};

    struct TestPeer {
        _dir: TempDir,
        network: Arc<PeerNetwork>,
        profile_id: ProfileId,
    }

    async fn peer(name: &str) -> TestPeer {
        let dir = tempdir().unwrap();
        let key = generate_keypair();
        let profile_id = ProfileId::from_public_key(&key.verifying_key());
        let repo = Arc::new(
            Repo::open(Arc::new(MapStore::new()), dir.path(), profile_id.clone()).unwrap(),
        );
        let mut p = repo.profile().unwrap().unwrap();
        p.peername = name.to_string();
        repo.set_profile(&p).unwrap();

        let network = Arc::new(PeerNetwork::new(
            repo,
            PeerId::from_public_key(&key.verifying_key()),
        ));
        TestPeer {
            _dir: dir,
            network,
            profile_id,
        }
    }

    async fn online(name: &str) -> (TestPeer, String) {
        let p = peer(name).await;
        let listener = p.network.bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(p.network.clone().serve(listener));
        (p, addr)
    }

    #[tokio::test]
    async fn test_offline_has_no_closest_peers() {
        let p = peer("lonely").await;
        assert!(!p.network.is_online());
        assert!(p.network.closest_connected_peers(&p.profile_id, 5).is_empty());
        assert!(p.network.connect("127.0.0.1:1").await.is_err());
    }

    #[tokio::test]
    async fn test_closest_prefers_target_connections() {
        let (me, _) = online("me").await;
        let (bob, bob_addr) = online("bob").await;
        let (carol, carol_addr) = online("carol").await;
        let (alice, alice_addr) = online("alice").await;

        me.network.connect(&bob_addr).await.unwrap();
        me.network.connect(&carol_addr).await.unwrap();
        me.network.connect(&alice_addr).await.unwrap();

        let alice_peer = alice.network.peer_id().clone();
        let closest = me.network.closest_connected_peers(&alice.profile_id, 2);
        assert_eq!(closest.len(), 2);
        assert_eq!(closest[0], alice_peer);
        assert_eq!(&closest[1], bob.network.peer_id());

        let all = me.network.closest_connected_peers(&alice.profile_id, 10);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], alice_peer);
        assert_eq!(&all[2], carol.network.peer_id());

        assert!(me.network.closest_connected_peers(&alice.profile_id, 0).is_empty());
    }

    #[tokio::test]
    async fn test_handshake_records_profiles() {
        let (me, _) = online("me").await;
        let (bob, bob_addr) = online("bob").await;

        let got = me.network.connect(&bob_addr).await.unwrap();
        assert_eq!(got.peername, "bob");
        assert_eq!(got.id, bob.profile_id);
        assert!(got.privkey.is_none());

        let stored = me.network.repo().profiles().get_profile(&bob.profile_id).unwrap();
        assert_eq!(stored.peer_ids, vec![bob.network.peer_id().clone()]);
        assert_eq!(stored.addresses, vec![bob_addr.clone()]);

        assert_eq!(me.network.connected_peers(), vec![bob.network.peer_id().clone()]);
        assert_eq!(me.network.connected_profiles().len(), 1);

        // the listener side registers the inbound connection too
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(bob.network.connected_peers(), vec![me.network.peer_id().clone()]);

        assert_eq!(me.network.disconnect(bob.network.peer_id()), 1);
        assert!(me.network.connected_peers().is_empty());

        me.network.connect(&bob_addr).await.unwrap();
        me.network.go_offline();
        assert!(me.network.conns().is_empty());
        assert!(me.network.closest_connected_peers(&bob.profile_id, 3).is_empty());
    }

    #[tokio::test]
    async fn test_closed_peers_are_dropped() {
        let (me, _) = online("me").await;
        let (bob, bob_addr) = online("bob").await;
        let ghost = peer("ghost").await;
        let ghost_hello = serde_json::to_string(&ghost.network.hello().unwrap()).unwrap();

        // answers the handshake, then hangs up
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ghost_addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
            let (socket, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = socket.into_split();
            let mut line = String::new();
            BufReader::new(reader).read_line(&mut line).await.unwrap();
            writer
                .write_all(format!("OK {}\n", ghost_hello).as_bytes())
                .await
                .unwrap();
        });

        me.network.connect(&bob_addr).await.unwrap();
        me.network.connect(&ghost_addr).await.unwrap();
        assert_eq!(me.network.connected_peers().len(), 2);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(me.network.drop_closed().await, 1);
        assert_eq!(me.network.connected_peers(), vec![bob.network.peer_id().clone()]);
        assert_eq!(me.network.drop_closed().await, 0);
    }

    #[tokio::test]
    async fn test_request_datasets_list_fills_ref_cache() {
        let (me, _) = online("me").await;
        let (bob, bob_addr) = online("bob").await;
        let saved = bob
            .network
            .repo()
            .save_dataset("rivers", Default::default())
            .await
            .unwrap();

        me.network.connect(&bob_addr).await.unwrap();
        let refs = me
            .network
            .request_datasets_list(bob.network.peer_id(), DatasetsListParams { limit: 10, offset: 0 })
            .await
            .unwrap();
        assert_eq!(refs, vec![saved.bare()]);

        let cached = me.network.repo().ref_cache().get_ref(&DatasetRef::new("bob", "rivers")).unwrap();
        assert_eq!(cached.path, saved.path);
    }

    #[tokio::test]
    async fn test_request_from_inbound_only_peer_dials_back() {
        let (me, _) = online("me").await;
        let (bob, bob_addr) = online("bob").await;
        bob.network.repo().save_dataset("rivers", Default::default()).await.unwrap();

        let me_addr = me.network.listen_addr().unwrap().to_string();
        bob.network.connect(&me_addr).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(me.network.conns().iter().all(|c| !c.is_outbound()));

        let refs = me
            .network
            .request_datasets_list(bob.network.peer_id(), DatasetsListParams { limit: 10, offset: 0 })
            .await
            .unwrap();
        assert_eq!(refs.len(), 1);
        assert!(me
            .network
            .conns_to_peer(bob.network.peer_id())
            .iter()
            .any(|c| c.is_outbound() && c.remote_addr() == bob_addr));
    }

    #[tokio::test]
    async fn test_unknown_peer_is_a_network_error() {
        let (me, _) = online("me").await;
        let stranger = PeerId::from_public_key(&generate_keypair().verifying_key());
        let err = me
            .network
            .request_datasets_list(&stranger, DatasetsListParams { limit: 10, offset: 0 })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }
}
