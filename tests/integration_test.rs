use std::mem::discriminant;
use std::sync::Arc;

use dsrepo::config::Config;
use dsrepo::p2p::Hello;
use dsrepo::params::{ConnectParams, ListParams, LogParams, PeerInfoParams, PeerRefsParams, SaveParams};
use dsrepo::sdk::Client;
use dsrepo::{
    Dataset, DatasetRef, DatasetRequests, Error, ErrorKind, HistoryRequests, Node, PeerRequests,
    ProfileRequests, RepoRequests, Requests, SearchParams, SearchRequests,
};
use tempfile::{tempdir, TempDir};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

struct TestNode {
    _dir: TempDir,
    node: Arc<Node>,
    p2p_addr: String,
}

async fn start_node(peername: &str) -> TestNode {
    let dir = tempdir().unwrap();
    let node = Arc::new(Node::open(dir.path(), &Config::default_config()).await.unwrap());
    let mut profile = node.get_profile().await.unwrap();
    profile.peername = peername.to_string();
    node.set_profile(&profile).await.unwrap();

    let network = node.network().clone();
    let listener = network.bind("127.0.0.1:0").await.unwrap();
    let p2p_addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(network.serve(listener));

    TestNode {
        _dir: dir,
        node,
        p2p_addr,
    }
}

async fn start_rpc(requests: Arc<dyn Requests>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let r = requests.clone();
            tokio::spawn(async move {
                let _ = dsrepo::server::handle_connection(socket, r).await;
            });
        }
    });
    addr.to_string()
}

#[tokio::test]
async fn test_end_to_end_get_references() {
    let a = start_node("alice").await;
    let b = start_node("bob").await;

    a.node
        .save(&SaveParams {
            name: "trees".to_string(),
            dataset: Dataset {
                title: "street trees".to_string(),
                ..Default::default()
            },
        })
        .await
        .unwrap();

    let mut resolved = DatasetRef::new("alice", "trees");
    assert!(resolved.path.is_empty());
    a.node.repo().resolve_ref(&mut resolved).await.unwrap();
    assert!(!resolved.path.is_empty());

    b.node
        .connect_to_peer(&ConnectParams {
            address: a.p2p_addr.clone(),
        })
        .await
        .unwrap();

    let params = PeerRefsParams {
        peer_id: a.node.network().peer_id().to_string(),
        limit: 10,
        offset: 0,
    };
    let refs = b.node.get_references(&params).await.unwrap();
    assert!(refs.contains(&resolved));

    // the same call through b's daemon
    let client = Client::connect(&start_rpc(b.node.clone()).await).await.unwrap();
    let remote = client.get_references(&params).await.unwrap();
    assert_eq!(remote, refs);

    // listed refs land in b's ref cache
    let cached = b.node.repo().ref_cache().get_ref(&DatasetRef::new("alice", "trees")).unwrap();
    assert_eq!(cached.path, resolved.path);
}

#[tokio::test]
async fn test_rpc_and_local_are_indistinguishable() {
    let a = start_node("alice").await;
    let client = Client::connect(&start_rpc(a.node.clone()).await).await.unwrap();
    let local: &dyn Requests = &*a.node;
    let remote: &dyn Requests = &client;

    assert_eq!(local.get_profile().await.unwrap(), remote.get_profile().await.unwrap());
    assert_eq!(
        PeerRequests::list(local, &ListParams::default()).await.unwrap(),
        PeerRequests::list(remote, &ListParams::default()).await.unwrap(),
    );

    let saved = remote
        .save(&SaveParams {
            name: "trees".to_string(),
            dataset: Dataset {
                title: "v1".to_string(),
                ..Default::default()
            },
        })
        .await
        .unwrap();
    let r = DatasetRef::new("alice", "trees");
    assert_eq!(local.get(&r).await.unwrap(), remote.get(&r).await.unwrap());
    assert_eq!(remote.get(&r).await.unwrap().path, saved.path);

    let log = LogParams::new(r.clone());
    assert_eq!(local.log(&log).await.unwrap(), remote.log(&log).await.unwrap());

    let q = SearchParams::new("v1");
    assert_eq!(local.search(&q).await.unwrap(), remote.search(&q).await.unwrap());
    assert_eq!(remote.search(&q).await.unwrap().refs.len(), 1);

    let failing: Vec<(dsrepo::Error, dsrepo::Error)> = vec![
        (
            local.info(&PeerInfoParams { peername: "nobody".to_string(), profile_id: None }).await.unwrap_err(),
            remote.info(&PeerInfoParams { peername: "nobody".to_string(), profile_id: None }).await.unwrap_err(),
        ),
        (
            local.log(&LogParams::new(DatasetRef::default())).await.unwrap_err(),
            remote.log(&LogParams::new(DatasetRef::default())).await.unwrap_err(),
        ),
        (
            local
                .get_references(&PeerRefsParams { peer_id: "???".to_string(), limit: 10, offset: 0 })
                .await
                .unwrap_err(),
            remote
                .get_references(&PeerRefsParams { peer_id: "???".to_string(), limit: 10, offset: 0 })
                .await
                .unwrap_err(),
        ),
        (
            local.get(&DatasetRef::default().with_path("/ipfs/Qm")).await.unwrap_err(),
            remote.get(&DatasetRef::default().with_path("/ipfs/Qm")).await.unwrap_err(),
        ),
        (
            local.get(&DatasetRef::new("alice", "rivers")).await.unwrap_err(),
            remote.get(&DatasetRef::new("alice", "rivers")).await.unwrap_err(),
        ),
    ];
    for (l, r) in &failing {
        assert_eq!(discriminant(l), discriminant(r), "{} vs {}", l, r);
        assert_eq!(l.kind(), r.kind());
        assert_eq!(l.to_string(), r.to_string());
    }
    assert!(matches!(failing[2].1, Error::InvalidPeerId(_)));
    assert!(matches!(failing[3].1, Error::InvalidPath(_)));
}

#[tokio::test]
async fn test_search_and_maintenance_over_rpc() {
    let a = start_node("alice").await;
    let client = Client::connect(&start_rpc(a.node.clone()).await).await.unwrap();

    let trees = client
        .save(&SaveParams {
            name: "trees".to_string(),
            dataset: Dataset {
                title: "street trees".to_string(),
                ..Default::default()
            },
        })
        .await
        .unwrap();
    let hits = client.search(&SearchParams::new("street")).await.unwrap();
    assert_eq!(hits.refs.len(), 1);
    assert_eq!(hits.refs[0].path, trees.path);
    assert_eq!(client.reindex().await.unwrap(), 1);

    assert!(client.dangling_refs().await.unwrap().is_empty());
    let events = client.events(&ListParams::default()).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].dataset_ref.name, "trees");

    client.save(&SaveParams { name: "rivers".to_string(), dataset: Dataset::default() }).await.unwrap();
    let store = a.node.repo().base().join("store");
    std::fs::remove_dir_all(&store).unwrap();
    std::fs::create_dir_all(&store).unwrap();
    assert_eq!(client.dangling_refs().await.unwrap().len(), 2);
    assert_eq!(client.prune_dangling_refs().await.unwrap().len(), 2);
    assert!(DatasetRequests::list(&client, &ListParams::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_connected_peers_drops_hung_up_peers() {
    let a = start_node("alice").await;
    let b = start_node("bob").await;

    // carol answers the handshake and then goes away
    let carol_dir = tempdir().unwrap();
    let carol = Node::open(carol_dir.path(), &Config::default_config()).await.unwrap();
    let hello = Hello {
        peer_id: carol.network().peer_id().clone(),
        profile: carol.get_profile().await.unwrap(),
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let carol_addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = socket.into_split();
        let mut line = String::new();
        BufReader::new(reader).read_line(&mut line).await.unwrap();
        let reply = format!("OK {}\n", serde_json::to_string(&hello).unwrap());
        writer.write_all(reply.as_bytes()).await.unwrap();
    });

    for address in [carol_addr, b.p2p_addr.clone()] {
        a.node.connect_to_peer(&ConnectParams { address }).await.unwrap();
    }
    assert_eq!(a.node.network().connected_peers().len(), 2);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let client = Client::connect(&start_rpc(a.node.clone()).await).await.unwrap();
    let connected = client.connected_peers(10).await.unwrap();
    assert_eq!(connected, vec![b.node.network().peer_id().clone()]);
}

#[tokio::test]
async fn test_log_rejects_empty_ref_over_rpc() {
    let a = start_node("alice").await;
    let client = Client::connect(&start_rpc(a.node.clone()).await).await.unwrap();
    let err = client.log(&LogParams::new(DatasetRef::default())).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(err.is_client_error());
}

#[tokio::test]
async fn test_peer_list_respects_limit_and_excludes_self() {
    let a = start_node("alice").await;
    let mut others = Vec::new();
    for name in ["bob", "carol", "dave"] {
        let n = start_node(name).await;
        a.node
            .connect_to_peer(&ConnectParams {
                address: n.p2p_addr.clone(),
            })
            .await
            .unwrap();
        others.push(n);
    }
    let me = a.node.get_profile().await.unwrap();

    // four known profiles including self
    for limit in 0..6 {
        let got = PeerRequests::list(&*a.node, &ListParams::new(limit, 0)).await.unwrap();
        assert_eq!(got.len(), limit.min(3));
        assert!(got.iter().all(|p| p.id != me.id));
    }

    let connected = a.node.connected_peers(10).await.unwrap();
    assert_eq!(connected.len(), 3);
    assert!(!connected.contains(a.node.network().peer_id()));

    let closest = a.node.network().closest_connected_peers(&others[2].node.get_profile().await.unwrap().id, 2);
    assert_eq!(closest.len(), 2);
    assert_eq!(&closest[0], others[2].node.network().peer_id());
    assert_eq!(&closest[1], others[0].node.network().peer_id());
}

#[tokio::test]
async fn test_raw_protocol() {
    let a = start_node("alice").await;
    let addr = start_rpc(a.node.clone()).await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut response = String::new();

    writer.write_all(b"PING\n").await.unwrap();
    reader.read_line(&mut response).await.unwrap();
    assert_eq!(response.trim(), "PONG");

    writer.write_all(b"CALL ProfileRequests.GetProfile\n").await.unwrap();
    response.clear();
    reader.read_line(&mut response).await.unwrap();
    assert!(response.starts_with("OK {"));
    assert!(response.contains("\"peername\":\"alice\""));

    writer.write_all(b"CALL PeerRequests.Info {\"peername\":\"nobody\"}\n").await.unwrap();
    response.clear();
    reader.read_line(&mut response).await.unwrap();
    assert_eq!(
        response.trim(),
        r#"ERR {"kind":"not_found","code":"not_found","message":"not found"}"#
    );

    writer.write_all(b"CALL HistoryRequests.Log {not json\n").await.unwrap();
    response.clear();
    reader.read_line(&mut response).await.unwrap();
    assert!(response.starts_with(r#"ERR {"kind":"invalid_input""#));

    writer.write_all(b"CALL Nope.Nothing {}\n").await.unwrap();
    response.clear();
    reader.read_line(&mut response).await.unwrap();
    assert!(response.starts_with("ERR "));
}

#[tokio::test]
async fn test_client_redials_after_connection_loss() {
    let a = start_node("alice").await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let requests: Arc<dyn Requests> = a.node.clone();
    tokio::spawn(async move {
        // the first connection answers one line and hangs up
        if let Ok((socket, _)) = listener.accept().await {
            let (reader, mut writer) = socket.into_split();
            let mut line = String::new();
            let _ = BufReader::new(reader).read_line(&mut line).await;
            let _ = writer.write_all(b"PONG\n").await;
        }
        while let Ok((socket, _)) = listener.accept().await {
            let r = requests.clone();
            tokio::spawn(async move {
                let _ = dsrepo::server::handle_connection(socket, r).await;
            });
        }
    });

    let client = Client::connect(&addr).await.unwrap();
    client.ping().await.unwrap();

    // the call in flight when the connection dropped is not resent
    let err = client.get_profile().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);

    let profile = client.get_profile().await.unwrap();
    assert_eq!(profile.peername, "alice");
}
