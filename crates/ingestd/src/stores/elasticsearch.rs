//! 📡 ElasticsearchStore: tallies as scripted upserts.
//!
//! Every message becomes one `POST /{index}/_update/{id}` with a painless script that
//! adds `params.count` to the stored `count`, plus an `upsert` body for the first time
//! a document shows up. Elasticsearch applies the script atomically per document and
//! `retry_on_conflict` soaks up the version races when two savers hit the same doc.
//!
//! - partition counters live in `partition_index`, doc id = partition key
//! - entity documents live in the index named by the message's collection,
//!   doc id = `{partition_key}:{entity hash}`

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, trace};

use super::DocumentStore;
use crate::common::StoreMessage;

const INCREMENT_PARTITION: &str = "ctx._source.count += params.count";
const INCREMENT_ENTITY: &str = "ctx._source.count += params.count; ctx._source.word = params.word; ctx._source.partition = params.partition";

#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchStoreConfig {
    /// 📡 Cluster root, e.g. `http://127.0.0.1:9200`.
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 API key. Beats basic auth when both are set.
    #[serde(default)]
    pub api_key: Option<String>,
    /// 📁 Index holding one counter document per partition.
    #[serde(default = "default_partition_index")]
    pub partition_index: String,
    /// 🔄 How many times Elasticsearch retries an update that lost a version race.
    #[serde(default = "default_retry_on_conflict")]
    pub retry_on_conflict: u32,
}

fn default_partition_index() -> String {
    "partitions".to_string()
}

fn default_retry_on_conflict() -> u32 {
    5
}

#[derive(Debug)]
pub struct ElasticsearchStore {
    client: reqwest::Client,
    config: ElasticsearchStoreConfig,
    base_url: Url,
}

impl ElasticsearchStore {
    /// 🚀 Build the client and ping the cluster once, so a bad URL fails at startup
    /// instead of 50,000 messages later.
    pub async fn new(config: ElasticsearchStoreConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url)
            .with_context(|| format!("💀 '{}' is not a URL we can send anything to", config.url))?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("💀 The HTTP client refused to be born. Probably TLS. It's always TLS.")?;

        let store = Self {
            client,
            config,
            base_url,
        };
        let response = store
            .authorize(store.client.get(store.base_url.clone()))
            .send()
            .await
            .with_context(|| {
                format!(
                    "💀 Knocked on Elasticsearch at '{}' and nobody answered. Is it running?",
                    store.config.url
                )
            })?;
        if !response.status().is_success() {
            anyhow::bail!(
                "💀 Elasticsearch at '{}' answered the ping with {}. Check the URL and the credentials.",
                store.config.url,
                response.status()
            );
        }
        debug!("✅ Elasticsearch store connected to {}", store.config.url);
        Ok(store)
    }

    /// 🔒 API key wins over basic auth. This is not a democracy.
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("ApiKey {}", api_key))
        } else if let Some(ref username) = self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }

    /// 🔗 `{base}/{index}/_update/{id}?retry_on_conflict=N`, every segment percent-encoded.
    fn update_url(&self, index: &str, id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("💀 '{}' can't have a path appended to it", self.config.url))?
            .pop_if_empty()
            .extend([index, "_update", id]);
        url.query_pairs_mut()
            .append_pair("retry_on_conflict", &self.config.retry_on_conflict.to_string());
        Ok(url)
    }

    /// 🧾 Index, document id and request body for one message.
    fn render(&self, message: &StoreMessage) -> (String, String, Value) {
        match message {
            StoreMessage::PartitionCount { partition_key, count } => (
                self.config.partition_index.clone(),
                partition_key.clone(),
                json!({
                    "script": {
                        "source": INCREMENT_PARTITION,
                        "lang": "painless",
                        "params": { "count": count }
                    },
                    "upsert": { "partition": partition_key, "count": count }
                }),
            ),
            StoreMessage::EntityCount { partition_key, collection, doc_id, payload } => (
                collection.clone(),
                format!("{partition_key}:{doc_id}"),
                json!({
                    "script": {
                        "source": INCREMENT_ENTITY,
                        "lang": "painless",
                        "params": {
                            "count": payload.count,
                            "word": payload.word,
                            "partition": partition_key
                        }
                    },
                    "upsert": {
                        "partition": partition_key,
                        "word": payload.word,
                        "count": payload.count
                    }
                }),
            ),
        }
    }
}

#[async_trait]
impl DocumentStore for ElasticsearchStore {
    async fn persist(&mut self, message: &StoreMessage) -> Result<()> {
        let (index, id, body) = self.render(message);
        let url = self.update_url(&index, &id)?;
        let response = self
            .authorize(self.client.post(url))
            .json(&body)
            .send()
            .await
            .with_context(|| {
                format!("💀 The update for '{index}/{id}' never reached Elasticsearch. Check connectivity.")
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "💀 Elasticsearch rejected the update for '{}/{}' with {}: {}",
                index,
                id,
                status,
                body
            );
        }
        trace!(index = %index, id = %id, "📡 increment landed");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        // -- nothing buffered, nothing to flush. the connection pool drops on its own.
        debug!("🗑️ Elasticsearch store closing");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::common::entity_doc_id;

    fn config_for(server: &MockServer) -> ElasticsearchStoreConfig {
        ElasticsearchStoreConfig {
            url: server.uri(),
            username: None,
            password: None,
            api_key: Some("sekrit".to_string()),
            partition_index: default_partition_index(),
            retry_on_conflict: default_retry_on_conflict(),
        }
    }

    async fn mock_ping(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tagline": "You Know, for Search"})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn the_one_where_a_partition_count_becomes_a_scripted_upsert() -> Result<()> {
        let server = MockServer::start().await;
        mock_ping(&server).await;
        Mock::given(method("POST"))
            .and(path("/partitions/_update/acme%20corp"))
            .and(query_param("retry_on_conflict", "5"))
            .and(header("Authorization", "ApiKey sekrit"))
            .and(body_partial_json(json!({
                "script": { "params": { "count": 2 } },
                "upsert": { "partition": "acme corp", "count": 2 }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut store = ElasticsearchStore::new(config_for(&server)).await?;
        store.persist(&StoreMessage::partition("acme corp", 2)).await?;
        store.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_entity_lands_under_its_partition_and_hash() -> Result<()> {
        let server = MockServer::start().await;
        mock_ping(&server).await;
        let expected_path = format!("/entities/_update/acme%20corp:{}", entity_doc_id("android"));
        Mock::given(method("POST"))
            .and(path(expected_path.as_str()))
            .and(body_partial_json(json!({
                "upsert": { "word": "android", "count": 3, "partition": "acme corp" }
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let mut store = ElasticsearchStore::new(config_for(&server)).await?;
        store.persist(&StoreMessage::entity("acme corp", "android", 3)).await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_elasticsearch_says_no_and_we_listen() -> Result<()> {
        let server = MockServer::start().await;
        mock_ping(&server).await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_string("version conflict, forever"))
            .mount(&server)
            .await;

        let mut store = ElasticsearchStore::new(config_for(&server)).await?;
        let err = store
            .persist(&StoreMessage::partition("acme corp", 1))
            .await
            .expect_err("💀 a 409 should not be a success");
        assert!(err.to_string().contains("409"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_ping_fails_and_startup_refuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        assert!(ElasticsearchStore::new(config_for(&server)).await.is_err());
    }
}
