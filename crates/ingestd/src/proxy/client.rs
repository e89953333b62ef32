//! 📞 RemoteQueueClient: the producer's end of the proxy.
//!
//! Dialing is retried (the server may simply not be up yet). A wrong secret is not
//! retried, ever. When a connection breaks mid-request we drop it and report the
//! error; the next call dials again. We never blindly re-send a put whose fate we
//! don't know, because a put that landed twice counts twice.

use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info, warn};

use super::protocol::{Request, Response, read_frame, write_frame};
use super::{ProxyConfig, ProxyError};
use crate::common::RawRecord;

#[derive(Debug)]
struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

#[derive(Debug)]
pub struct RemoteQueueClient {
    address: String,
    token: String,
    connect_attempts: u32,
    retry_delay: Duration,
    connection: Option<Connection>,
}

impl RemoteQueueClient {
    /// 🏗️ A client that hasn't dialed yet. The first call connects.
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            address: config.socket_address(),
            retry_delay: config.connect_retry_delay(),
            connect_attempts: config.connect_attempts.max(1),
            token: config.token,
            connection: None,
        }
    }

    /// 📞 Build a client and connect right away, retrying while the server isn't reachable.
    pub async fn connect(config: ProxyConfig) -> Result<Self, ProxyError> {
        let mut client = Self::new(config);
        client.ensure_connected().await?;
        Ok(client)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// 🎯 A handle to the named remote queue. Only `put` and `put_many` live here.
    pub fn queue(&mut self, name: impl Into<String>) -> RemoteQueue<'_> {
        RemoteQueue {
            client: self,
            name: name.into(),
        }
    }

    async fn ensure_connected(&mut self) -> Result<&mut Connection, ProxyError> {
        if self.connection.is_none() {
            let connection = self.dial().await?;
            self.connection = Some(connection);
        }
        match self.connection.as_mut() {
            Some(connection) => Ok(connection),
            None => Err(ProxyError::Protocol("connection vanished right after dialing".to_string())),
        }
    }

    async fn dial(&self) -> Result<Connection, ProxyError> {
        let stream = self.dial_with_retries().await?;
        stream.set_nodelay(true)?;
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let hello = Request::Hello {
            token: self.token.clone(),
        };
        write_frame(&mut writer, &hello).await?;
        match read_frame::<_, Response>(&mut reader).await? {
            Some(Response::Welcome) => {
                info!("📞 connected to queue proxy at {}", self.address);
                Ok(Connection { reader, writer })
            }
            Some(Response::Denied { reason }) => Err(ProxyError::AuthRejected(reason)),
            Some(other) => Err(ProxyError::Protocol(format!(
                "expected a welcome, got {other:?}"
            ))),
            None => Err(ProxyError::Io(std::io::Error::from(
                std::io::ErrorKind::UnexpectedEof,
            ))),
        }
    }

    async fn dial_with_retries(&self) -> Result<TcpStream, ProxyError> {
        let mut attempt = 1;
        loop {
            match TcpStream::connect(&self.address).await {
                Ok(stream) => return Ok(stream),
                Err(source) if attempt < self.connect_attempts => {
                    warn!(
                        "🔌 queue proxy at {} not reachable yet (attempt {}/{}): {}. retrying in {:?}",
                        self.address, attempt, self.connect_attempts, source, self.retry_delay
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(source) => {
                    return Err(ProxyError::Connect {
                        address: self.address.clone(),
                        source,
                    });
                }
            }
        }
    }

    /// 📨 One request, one response. A broken connection is dropped so the next call redials.
    async fn call(&mut self, request: &Request) -> Result<Response, ProxyError> {
        let connection = self.ensure_connected().await?;
        let outcome: Result<Response, ProxyError> = async {
            write_frame(&mut connection.writer, request).await?;
            read_frame::<_, Response>(&mut connection.reader)
                .await?
                .ok_or_else(|| ProxyError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)))
        }
        .await;

        if let Err(ref err) = outcome {
            if err.is_transient() {
                debug!("🔌 dropping broken proxy connection: {err}");
                self.connection = None;
            }
        }
        outcome
    }
}

/// 🎯 A borrowed handle to one remote queue.
#[derive(Debug)]
pub struct RemoteQueue<'a> {
    client: &'a mut RemoteQueueClient,
    name: String,
}

impl RemoteQueue<'_> {
    /// 📥 Enqueue one record remotely. Returns how many made it in (0 once the queue stops accepting).
    pub async fn put(&mut self, record: RawRecord) -> Result<usize, ProxyError> {
        let request = Request::Put {
            queue: self.name.clone(),
            record,
        };
        accepted(self.client.call(&request).await?)
    }

    /// 📥📥 Enqueue many records in one round trip, order preserved.
    pub async fn put_many(&mut self, records: Vec<RawRecord>) -> Result<usize, ProxyError> {
        let request = Request::PutMany {
            queue: self.name.clone(),
            records,
        };
        accepted(self.client.call(&request).await?)
    }
}

fn accepted(response: Response) -> Result<usize, ProxyError> {
    match response {
        Response::Accepted { queued } => Ok(queued),
        Response::Failed { message } => Err(ProxyError::Remote(message)),
        Response::Denied { reason } => Err(ProxyError::AuthRejected(reason)),
        Response::Welcome => Err(ProxyError::Protocol(
            "got a second welcome instead of an answer".to_string(),
        )),
    }
}
