//! Line framing shared by the RPC and peer protocols.
//!
//! Requests are single lines, `COMMAND [json]`. Responses are `OK [json]`,
//! `PONG`, or `ERR <json WireError>`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::WireError;
use crate::{Error, Result};

pub fn ok_line<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(format!("OK {}", serde_json::to_string(value)?))
}

pub fn err_line(e: &Error) -> String {
    let wire = WireError::from(e);
    match serde_json::to_string(&wire) {
        Ok(json) => format!("ERR {}", json),
        Err(_) => format!("ERR {}", e.to_string().to_lowercase()),
    }
}

/// Turns the outcome of a handler into a response line.
pub fn respond<T: Serialize>(res: Result<T>) -> String {
    match res.and_then(|v| ok_line(&v)) {
        Ok(line) => line,
        Err(e) => err_line(&e),
    }
}

/// Splits a request line into its upper-cased command and the remainder.
pub fn split_command(line: &str) -> (String, &str) {
    let line = line.trim();
    match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd.to_uppercase(), rest.trim()),
        None => (line.to_uppercase(), ""),
    }
}

/// Parses a JSON argument, treating bad input as the caller's fault.
pub fn parse_arg<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let raw = if raw.is_empty() { "null" } else { raw };
    serde_json::from_str(raw).map_err(|e| Error::InvalidInput(format!("invalid arguments: {}", e)))
}

/// Decodes a response line into a value or the error it carries.
pub fn parse_response<T: DeserializeOwned>(line: &str) -> Result<T> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("ERR ") {
        return Err(match serde_json::from_str::<WireError>(rest) {
            Ok(wire) => wire.into(),
            Err(_) => Error::Network(rest.to_string()),
        });
    }
    let json = match line {
        "OK" => "null",
        _ => line
            .strip_prefix("OK ")
            .ok_or_else(|| Error::Network(format!("invalid response: {:?}", line)))?,
    };
    Ok(serde_json::from_str(json)?)
}

/// One request/response stream over TCP.
pub struct LineConn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl LineConn {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(Error::network)?;
        Ok(Self::new(stream))
    }

    pub fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Sends one line and waits for one line back.
    pub async fn round_trip(&mut self, line: &str) -> Result<String> {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(Error::network)?;
        let mut resp = String::new();
        let n = self.reader.read_line(&mut resp).await.map_err(Error::network)?;
        if n == 0 {
            return Err(Error::Network("connection closed by remote".to_string()));
        }
        Ok(resp)
    }

    pub async fn call<P: Serialize, R: DeserializeOwned>(&mut self, command: &str, params: &P) -> Result<R> {
        let line = format!("{} {}", command, serde_json::to_string(params)?);
        let resp = self.round_trip(&line).await?;
        parse_response(&resp)
    }
}
