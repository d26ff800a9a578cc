use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::identity::PeerId;
use crate::p2p::PeerNetwork;
use crate::params::DatasetsListParams;
use crate::profile::Profile;
use crate::wire::{err_line, parse_arg, respond, split_command};
use crate::{Error, Result};

pub const CMD_HELLO: &str = "HELLO";
pub const CMD_DATASETS: &str = "DATASETS";

/// Handshake payload each side sends the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    pub peer_id: PeerId,
    pub profile: Profile,
}

/// Serves one inbound peer connection until it closes.
pub async fn handle_connection(socket: TcpStream, network: Arc<PeerNetwork>) -> Result<()> {
    let remote_addr = socket
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    let mut conn_id = None;
    let res = serve_lines(socket, &network, &remote_addr, &mut conn_id).await;
    if let Some(id) = conn_id {
        network.remove_conn(id);
    }
    res
}

async fn serve_lines(
    socket: TcpStream,
    network: &PeerNetwork,
    remote_addr: &str,
    conn_id: &mut Option<u64>,
) -> Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break;
        }

        let (command, arg) = split_command(&line);
        if command.is_empty() {
            continue;
        }

        let response = match command.as_str() {
            CMD_HELLO => {
                if let Some(old) = conn_id.take() {
                    network.remove_conn(old);
                }
                respond(parse_arg::<Hello>(arg).and_then(|hello| {
                    let (conn, reply) = network.accept_hello(hello, remote_addr.to_string())?;
                    *conn_id = Some(conn.id());
                    Ok(reply)
                }))
            }
            CMD_DATASETS => respond(
                parse_arg::<DatasetsListParams>(arg).and_then(|p| network.list_datasets(p)),
            ),
            "PING" => "PONG".to_string(),
            "QUIT" => break,
            _ => err_line(&Error::InvalidInput(format!("unknown command {}", command))),
        };

        writer.write_all(format!("{}\n", response).as_bytes()).await?;
    }
    Ok(())
}
