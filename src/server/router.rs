use std::sync::Arc;

use log::{debug, error, info};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::methods;
use crate::params::{ConnectParams, ListParams, LogParams, PeerInfoParams, PeerRefsParams, SaveParams};
use crate::profile::Profile;
use crate::repo::SearchParams;
use crate::wire::{err_line, parse_arg, respond, split_command};
use crate::{
    DatasetRef, DatasetRequests, Error, HistoryRequests, PeerRequests, ProfileRequests,
    RepoRequests, Requests, Result, SearchRequests,
};

const MAX_CONNECTIONS: usize = 100;

/// Serves the request traits over RPC.
pub struct Router {
    requests: Arc<dyn Requests>,
    semaphore: Arc<Semaphore>,
}

impl Router {
    pub fn new(requests: Arc<dyn Requests>) -> Self {
        Self {
            requests,
            semaphore: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        }
    }

    pub async fn listen(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("rpc listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accepts RPC connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (socket, _) = listener.accept().await?;
            let requests = self.requests.clone();
            let sem = self.semaphore.clone();

            tokio::spawn(async move {
                let _permit = match sem.try_acquire() {
                    Ok(p) => p,
                    Err(_) => {
                        error!("too many concurrent rpc connections, rejecting");
                        let mut socket = socket;
                        let _ = socket.shutdown().await;
                        return;
                    }
                };

                if let Err(e) = handle_connection(socket, requests).await {
                    error!("rpc connection error: {}", e);
                }
            });
        }
    }
}

pub async fn handle_connection(mut socket: TcpStream, requests: Arc<dyn Requests>) -> Result<()> {
    let (reader, mut writer) = socket.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break;
        }

        let (command, rest) = split_command(&line);
        if command.is_empty() {
            continue;
        }

        let response = match command.as_str() {
            "CALL" => {
                let (method, raw) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                debug!("rpc {}", method);
                dispatch(requests.as_ref(), method, raw.trim()).await
            }
            "PING" => "PONG".to_string(),
            "QUIT" => break,
            _ => err_line(&Error::InvalidInput(format!("unknown command {}", command))),
        };

        writer.write_all(format!("{}\n", response).as_bytes()).await?;
    }
    Ok(())
}

/// Runs one `Component.Method` call and renders its response line.
pub async fn dispatch(requests: &dyn Requests, method: &str, raw: &str) -> String {
    match method {
        methods::PEERS_LIST => match parse_arg::<ListParams>(raw) {
            Ok(p) => respond(PeerRequests::list(requests, &p).await),
            Err(e) => err_line(&e),
        },
        methods::PEERS_INFO => match parse_arg::<PeerInfoParams>(raw) {
            Ok(p) => respond(requests.info(&p).await),
            Err(e) => err_line(&e),
        },
        methods::PEERS_GET_REFERENCES => match parse_arg::<PeerRefsParams>(raw) {
            Ok(p) => respond(requests.get_references(&p).await),
            Err(e) => err_line(&e),
        },
        methods::PEERS_CONNECTED => match parse_arg::<usize>(raw) {
            Ok(limit) => respond(requests.connected_peers(limit).await),
            Err(e) => err_line(&e),
        },
        methods::PEERS_CONNECTED_PROFILES => match parse_arg::<usize>(raw) {
            Ok(limit) => respond(requests.connected_profiles(limit).await),
            Err(e) => err_line(&e),
        },
        methods::PEERS_CONNECT => match parse_arg::<ConnectParams>(raw) {
            Ok(p) => respond(requests.connect_to_peer(&p).await),
            Err(e) => err_line(&e),
        },
        methods::HISTORY_LOG => match parse_arg::<LogParams>(raw) {
            Ok(p) => respond(requests.log(&p).await),
            Err(e) => err_line(&e),
        },
        methods::DATASETS_LIST => match parse_arg::<ListParams>(raw) {
            Ok(p) => respond(DatasetRequests::list(requests, &p).await),
            Err(e) => err_line(&e),
        },
        methods::DATASETS_GET => match parse_arg::<DatasetRef>(raw) {
            Ok(r) => respond(requests.get(&r).await),
            Err(e) => err_line(&e),
        },
        methods::DATASETS_SAVE => match parse_arg::<SaveParams>(raw) {
            Ok(p) => respond(requests.save(&p).await),
            Err(e) => err_line(&e),
        },
        methods::DATASETS_REMOVE => match parse_arg::<DatasetRef>(raw) {
            Ok(r) => respond(requests.remove(&r).await),
            Err(e) => err_line(&e),
        },
        methods::SEARCH => match parse_arg::<SearchParams>(raw) {
            Ok(p) => respond(requests.search(&p).await),
            Err(e) => err_line(&e),
        },
        methods::PROFILE_GET => respond(requests.get_profile().await),
        methods::PROFILE_SET => match parse_arg::<Profile>(raw) {
            Ok(p) => respond(requests.set_profile(&p).await),
            Err(e) => err_line(&e),
        },
        methods::REPO_EVENTS => match parse_arg::<ListParams>(raw) {
            Ok(p) => respond(requests.events(&p).await),
            Err(e) => err_line(&e),
        },
        methods::REPO_DANGLING => respond(requests.dangling_refs().await),
        methods::REPO_PRUNE => respond(requests.prune_dangling_refs().await),
        methods::REPO_REINDEX => respond(requests.reindex().await),
        _ => err_line(&Error::InvalidInput(format!("unknown method {:?}", method))),
    }
}
