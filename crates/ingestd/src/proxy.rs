//! 🛰️ The queue proxy: how an out-of-process producer reaches the input queue.
//!
//! A tiny RPC service over a loopback TCP listener. One real method (enqueue), one
//! shared secret, newline-delimited JSON frames. No remote `get`: only in-process
//! workers drain queues.
//!
//! ```text
//!   producer ──RemoteQueueClient──▶ tcp 127.0.0.1:50000 ──QueueProxyServer──▶ DrainableQueue
//!            hello{token} / put{queue, record} / put_many{queue, records}
//! ```
//!
//! ⚠️ The secret is the only access control. It is not encryption. Trusted host,
//! single machine, loopback. Don't put this on the internet. The internet has opinions.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{RemoteQueue, RemoteQueueClient};
pub use server::{ProxyHandle, QueueProxyServer};

/// 🔧 Where the proxy listens and what secret it expects. Shared by server and client.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// 🏠 A literal loopback address. Not `localhost`: some resolvers make every
    /// lookup of it cost real milliseconds, and we do a lot of puts.
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_token")]
    pub token: String,
    /// 🔄 How many times the client dials before giving up on a server that isn't up yet.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
    /// ⏱️ How long the server waits for a new connection's hello before hanging up.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    50000
}

fn default_token() -> String {
    "ingestbackend".to_string()
}

fn default_connect_attempts() -> u32 {
    10
}

fn default_connect_retry_delay_ms() -> u64 {
    500
}

fn default_handshake_timeout_ms() -> u64 {
    5_000
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            token: default_token(),
            connect_attempts: default_connect_attempts(),
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

impl ProxyConfig {
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// 🏷️ Everything that can go wrong talking to the proxy, split the way callers care about:
/// retry it, or give up on it.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// 🔌 Couldn't reach the server. Probably not up yet. Try again.
    #[error("could not connect to queue proxy at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
    /// 🔌 The connection broke mid-conversation.
    #[error("queue proxy connection failed: {0}")]
    Io(#[from] std::io::Error),
    /// 🔒 Wrong secret. Retrying with the same secret will not make it right.
    #[error("queue proxy rejected our credentials: {0}")]
    AuthRejected(String),
    /// 🤷 Somebody sent a frame that wasn't what it should have been.
    #[error("queue proxy protocol error: {0}")]
    Protocol(String),
    /// 💀 The server understood us and still said no (unknown queue, enqueue failure).
    #[error("queue proxy refused the request: {0}")]
    Remote(String),
}

impl ProxyError {
    /// 🔄 Worth reconnecting and trying again?
    pub fn is_transient(&self) -> bool {
        matches!(self, ProxyError::Connect { .. } | ProxyError::Io(_))
    }
}
