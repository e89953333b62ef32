//! 🛰️ QueueProxyServer: the loopback front door of the input queue.
//!
//! One accept loop, one task per connection. Every connection has to say hello with
//! the right secret before it gets to put anything anywhere, and it has to do so
//! quickly and briefly: the hello is capped at [`MAX_HELLO_BYTES`] and at the
//! configured handshake timeout.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use constant_time_eq::constant_time_eq;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::{MAX_HELLO_BYTES, Request, Response, read_frame, read_frame_within, write_frame};
use super::{ProxyConfig, ProxyError};
use crate::common::RawRecord;
use crate::queue::DrainableQueue;

type QueueRegistry = Arc<HashMap<String, DrainableQueue<RawRecord>>>;

#[derive(Debug)]
pub struct QueueProxyServer {
    config: ProxyConfig,
    queues: HashMap<String, DrainableQueue<RawRecord>>,
}

impl QueueProxyServer {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config,
            queues: HashMap::new(),
        }
    }

    /// 📇 Make `queue` reachable under its own name.
    pub fn register(mut self, queue: DrainableQueue<RawRecord>) -> Self {
        self.queues.insert(queue.name().to_string(), queue);
        self
    }

    /// 🚀 Bind and start accepting. Returns once the listener is live.
    pub async fn start(self) -> Result<ProxyHandle> {
        let address = self.config.socket_address();
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("💀 Couldn't bind the queue proxy to {address}. Is something else already sitting on that port?"))?;
        let local_addr = listener
            .local_addr()
            .context("💀 The listener bound but won't say where. Existential, but fatal.")?;
        info!(
            "🛰️ queue proxy listening on {} for queue(s): {:?}",
            local_addr,
            self.queues.keys().collect::<Vec<_>>()
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let token: Arc<str> = Arc::from(self.config.token.as_str());
        let queues: QueueRegistry = Arc::new(self.queues);
        let handshake_timeout = self.config.handshake_timeout();
        let task = tokio::spawn(accept_loop(listener, token, handshake_timeout, queues, shutdown_rx));

        Ok(ProxyHandle {
            local_addr,
            shutdown_tx,
            task,
        })
    }
}

/// 🎛️ The running proxy. Dropping it without `shutdown` also stops it, just less politely.
#[derive(Debug)]
pub struct ProxyHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl ProxyHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 🛑 Stop accepting, tell open connections to hang up, wait for the accept loop.
    pub async fn shutdown(self) -> Result<()> {
        // -- send_replace never fails, even with zero receivers left
        self.shutdown_tx.send_replace(true);
        self.task
            .await
            .context("💀 The proxy accept loop panicked on its way out")??;
        info!("🛰️ queue proxy stopped");
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    token: Arc<str>,
    handshake_timeout: Duration,
    queues: QueueRegistry,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        // -- one bad accept (EMFILE and friends) shouldn't take the door off its hinges
                        warn!("⚠️ queue proxy accept failed: {err}");
                        continue;
                    }
                };
                let token = Arc::clone(&token);
                let queues = Arc::clone(&queues);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, peer, token, handshake_timeout, queues, shutdown).await {
                        debug!(%peer, "🔌 proxy connection ended with error: {err}");
                    }
                });
            }
            _ = shutdown.changed() => {
                debug!("🛑 queue proxy accept loop shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    token: Arc<str>,
    handshake_timeout: Duration,
    queues: QueueRegistry,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ProxyError> {
    stream.set_nodelay(true)?;
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    // 🔒 handshake first. nothing touches a queue before this passes.
    let hello = read_frame_within::<_, Request>(&mut reader, MAX_HELLO_BYTES);
    let hello = tokio::select! {
        hello = tokio::time::timeout(handshake_timeout, hello) => match hello {
            Ok(frame) => frame?,
            Err(_) => {
                warn!(%peer, "⏱️ proxy client never said hello, hanging up");
                return Ok(());
            }
        },
        _ = shutdown.changed() => return Ok(()),
    };
    match hello {
        Some(Request::Hello { token: offered }) if constant_time_eq(offered.as_bytes(), token.as_bytes()) => {
            debug!(%peer, "🤝 proxy client authenticated");
            write_frame(&mut writer, &Response::Welcome).await?;
        }
        Some(Request::Hello { .. }) => {
            warn!(%peer, "🔒 proxy client offered the wrong secret");
            let denied = Response::Denied { reason: "invalid token".to_string() };
            write_frame(&mut writer, &denied).await?;
            return Ok(());
        }
        Some(_) => {
            warn!(%peer, "🔒 proxy client tried to skip the handshake");
            let denied = Response::Denied { reason: "authenticate with hello first".to_string() };
            write_frame(&mut writer, &denied).await?;
            return Ok(());
        }
        None => return Ok(()),
    }

    loop {
        let frame = tokio::select! {
            frame = read_frame::<_, Request>(&mut reader) => frame?,
            _ = shutdown.changed() => return Ok(()),
        };
        let response = match frame {
            None => return Ok(()),
            Some(Request::Hello { .. }) => Response::Failed {
                message: "already authenticated".to_string(),
            },
            Some(Request::Put { queue, record }) => match queues.get(&queue) {
                Some(target) => Response::Accepted {
                    queued: usize::from(target.put(record).await),
                },
                None => unknown_queue(&queue),
            },
            Some(Request::PutMany { queue, records }) => match queues.get(&queue) {
                Some(target) => Response::Accepted {
                    queued: target.put_many(records).await,
                },
                None => unknown_queue(&queue),
            },
        };
        write_frame(&mut writer, &response).await?;
    }
}

fn unknown_queue(name: &str) -> Response {
    Response::Failed {
        message: format!("no queue named '{name}' is registered"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::proxy::RemoteQueueClient;
    use crate::queue::Delivery;

    fn test_config(port: u16) -> ProxyConfig {
        ProxyConfig {
            port,
            token: "open sesame".to_string(),
            connect_attempts: 1,
            connect_retry_delay_ms: 10,
            ..ProxyConfig::default()
        }
    }

    async fn start_server(queue: &DrainableQueue<RawRecord>) -> Result<(ProxyHandle, ProxyConfig)> {
        let handle = QueueProxyServer::new(test_config(0))
            .register(queue.clone())
            .start()
            .await?;
        let client_config = test_config(handle.local_addr().port());
        Ok((handle, client_config))
    }

    #[tokio::test]
    async fn the_one_where_a_remote_put_lands_in_the_local_queue() -> Result<()> {
        let queue = DrainableQueue::unbounded("iqueue");
        let (handle, config) = start_server(&queue).await?;

        let mut client = RemoteQueueClient::connect(config).await?;
        let mut remote = client.queue("iqueue");
        assert_eq!(remote.put(RawRecord::new("John has an Android", "Me")).await?, 1);
        let many = vec![RawRecord::new("a", "X"), RawRecord::new("b", "Y")];
        assert_eq!(remote.put_many(many).await?, 2);

        assert_eq!(queue.get().await, Delivery::Item(RawRecord::new("John has an Android", "Me")));
        assert_eq!(queue.get().await, Delivery::Item(RawRecord::new("a", "X")));
        assert_eq!(queue.get().await, Delivery::Item(RawRecord::new("b", "Y")));

        handle.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_wrong_secret_gets_the_door() -> Result<()> {
        let queue = DrainableQueue::unbounded("iqueue");
        let (handle, mut config) = start_server(&queue).await?;
        config.token = "open barley".to_string();

        let err = RemoteQueueClient::connect(config)
            .await
            .expect_err("💀 a wrong secret should never get in");
        assert!(matches!(err, ProxyError::AuthRejected(_)), "got {err:?}");
        assert!(!err.is_transient());
        assert!(queue.is_empty());

        handle.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_nobody_has_heard_of_that_queue() -> Result<()> {
        let queue = DrainableQueue::unbounded("iqueue");
        let (handle, config) = start_server(&queue).await?;

        let mut client = RemoteQueueClient::connect(config).await?;
        let err = client
            .queue("oqueue")
            .put(RawRecord::new("c", "p"))
            .await
            .expect_err("💀 oqueue is not remotely reachable");
        assert!(matches!(err, ProxyError::Remote(_)), "got {err:?}");

        // 🔁 the connection survives a refused request
        assert_eq!(client.queue("iqueue").put(RawRecord::new("c", "p")).await?, 1);
        handle.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_puts_after_shutdown_quietly_vanish() -> Result<()> {
        let queue = DrainableQueue::unbounded("iqueue");
        let (handle, config) = start_server(&queue).await?;
        queue.disable_writes();

        let mut client = RemoteQueueClient::connect(config).await?;
        assert_eq!(client.queue("iqueue").put(RawRecord::new("late", "p")).await?, 0);
        assert!(queue.is_empty());

        handle.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_client_waits_for_a_late_server() -> Result<()> {
        // 🎯 find a free port, let it go, and start the server on it only after the client starts dialing
        let port = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
        let queue = DrainableQueue::unbounded("iqueue");

        let mut client_config = test_config(port);
        client_config.connect_attempts = 50;
        client_config.connect_retry_delay_ms = 20;
        let dialing = tokio::spawn(RemoteQueueClient::connect(client_config));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let handle = QueueProxyServer::new(test_config(port))
            .register(queue.clone())
            .start()
            .await?;

        let mut client = dialing.await??;
        assert_eq!(client.queue("iqueue").put(RawRecord::new("finally", "p")).await?, 1);
        handle.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_server_comes_back_and_so_does_the_client() -> Result<()> {
        let queue = DrainableQueue::unbounded("iqueue");
        let (handle, config) = start_server(&queue).await?;
        let port = config.port;

        let mut client = RemoteQueueClient::connect(config).await?;
        assert_eq!(client.queue("iqueue").put(RawRecord::new("before", "p")).await?, 1);

        handle.shutdown().await?;
        // 😴 let the old connection task hang up before the new server shows up
        tokio::time::sleep(Duration::from_millis(50)).await;
        let handle = QueueProxyServer::new(test_config(port))
            .register(queue.clone())
            .start()
            .await?;

        let err = client
            .queue("iqueue")
            .put(RawRecord::new("lost in transit", "p"))
            .await
            .expect_err("💀 the old connection is gone, this put can't have gone through it");
        assert!(err.is_transient(), "got {err:?}");
        assert!(!client.is_connected());

        assert_eq!(client.queue("iqueue").put(RawRecord::new("after", "p")).await?, 1);
        assert!(client.is_connected());

        assert_eq!(queue.get().await, Delivery::Item(RawRecord::new("before", "p")));
        assert_eq!(queue.get().await, Delivery::Item(RawRecord::new("after", "p")));
        assert!(queue.is_empty());
        handle.shutdown().await?;
        Ok(())
    }

    /// 📖 What a silent peer gets back: 0 bytes means the server hung up on it.
    async fn wait_for_hangup(stream: &mut TcpStream) -> Result<usize> {
        use tokio::io::AsyncReadExt;
        let mut buf = [0u8; 64];
        let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .context("💀 the server kept a silent connection open")??;
        Ok(read)
    }

    #[tokio::test]
    async fn the_one_where_a_silent_peer_gets_hung_up_on() -> Result<()> {
        let queue = DrainableQueue::unbounded("iqueue");
        let mut config = test_config(0);
        config.handshake_timeout_ms = 100;
        let handle = QueueProxyServer::new(config).register(queue.clone()).start().await?;

        let mut silent = TcpStream::connect(handle.local_addr()).await?;
        assert_eq!(wait_for_hangup(&mut silent).await?, 0);

        handle.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_shutdown_does_not_wait_for_a_hello() -> Result<()> {
        let queue = DrainableQueue::unbounded("iqueue");
        let (handle, _config) = start_server(&queue).await?;

        let mut silent = TcpStream::connect(handle.local_addr()).await?;
        // 😴 make sure the connection task is parked in the handshake before pulling the plug
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await?;
        assert_eq!(wait_for_hangup(&mut silent).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_there_is_no_server_at_all() -> Result<()> {
        let port = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
        let mut config = test_config(port);
        config.connect_attempts = 2;
        let err = RemoteQueueClient::connect(config)
            .await
            .expect_err("💀 nothing is listening, nothing should connect");
        assert!(matches!(err, ProxyError::Connect { .. }), "got {err:?}");
        assert!(err.is_transient());
        Ok(())
    }
}
