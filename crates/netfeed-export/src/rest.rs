//! REST storage sink
//!
//! Inserts each batch with a single `POST {endpoint}/{table}` carrying a
//! JSON array of records. The endpoint speaks the PostgREST dialect used by
//! Supabase: the key goes in both `apikey` and a bearer token, and
//! `Prefer: return=minimal` asks for an empty response body.

use async_trait::async_trait;
use netfeed_core::{BatchSink, DeliveryError, NormalizedRecord, PluginInfo, StorageTarget};
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error};

/// Longest error body carried in a [`DeliveryError::Rejected`]
pub const MAX_ERROR_BODY_CHARS: usize = 500;

/// REST sink configuration
#[derive(Debug, Clone)]
pub struct RestSinkConfig {
    /// Collection URL records are POSTed to
    pub url: String,

    /// Project API key
    pub api_key: String,

    /// Request timeout
    pub timeout: Duration,

    pub user_agent: String,
}

impl RestSinkConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(30),
            user_agent: format!("netfeed/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Configuration for writing into `table` of `storage`
    pub fn for_table(storage: &StorageTarget, table: &str) -> Self {
        let mut config = Self::new(storage.collection_url(table), storage.api_key.clone());
        config.timeout = storage.timeout;
        config
    }
}

/// Sink that inserts batches through a REST endpoint
pub struct RestSink {
    config: RestSinkConfig,
    client: Client,
}

impl RestSink {
    pub fn new(config: RestSinkConfig) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            // A followed redirect would turn the insert into a GET
            .redirect(Policy::none())
            .build()
            .map_err(|e| DeliveryError::Transport(Box::new(e)))?;

        Ok(Self { config, client })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

impl PluginInfo for RestSink {
    fn name(&self) -> &str {
        "rest"
    }

    fn description(&self) -> &str {
        "Inserts batches into a PostgREST table"
    }
}

#[async_trait]
impl BatchSink for RestSink {
    async fn deliver(&self, batch: &[NormalizedRecord]) -> Result<(), DeliveryError> {
        if batch.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_vec(batch)?;
        debug!(
            "POST {} ({} rows, {} bytes)",
            self.config.url,
            batch.len(),
            body.len()
        );

        let response = self
            .client
            .post(&self.config.url)
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
            .header(CONTENT_TYPE, "application/json")
            .header("Prefer", "return=minimal")
            .body(body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(Box::new(e)))?;

        let status = response.status();
        if status.as_u16() < 300 {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        let body = truncate_chars(&text, MAX_ERROR_BODY_CHARS);
        error!("Storage POST {}: {}", status.as_u16(), body);
        Err(DeliveryError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use netfeed_core::RecordMetadata;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(frame: u64) -> NormalizedRecord {
        NormalizedRecord {
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            src_ip: "10.0.0.2".to_string(),
            dst_ip: "10.0.0.1".to_string(),
            src_port: Some(1234),
            dst_port: Some(80),
            protocol: "TCP".to_string(),
            payload: None,
            payload_size: 60,
            metadata: RecordMetadata {
                source: "tshark:file:/tmp/a.pcap".to_string(),
                frame_number: Some(frame),
            },
        }
    }

    fn sink_for(server: &MockServer) -> RestSink {
        let url = format!("{}/rest/v1/network_packets", server.uri());
        RestSink::new(RestSinkConfig::new(url, "secret-key")).unwrap()
    }

    #[tokio::test]
    async fn test_posts_batch_with_headers() {
        let server = MockServer::start().await;
        let batch = vec![record(1), record(2)];

        Mock::given(method("POST"))
            .and(path("/rest/v1/network_packets"))
            .and(header("apikey", "secret-key"))
            .and(header("authorization", "Bearer secret-key"))
            .and(header("content-type", "application/json"))
            .and(header("prefer", "return=minimal"))
            .and(body_json(serde_json::to_value(&batch).unwrap()))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        sink_for(&server).deliver(&batch).await.unwrap();
    }

    #[tokio::test]
    async fn test_body_keeps_null_fields() {
        let server = MockServer::start().await;
        let mut rec = record(1);
        rec.src_port = None;
        rec.metadata.frame_number = None;

        Mock::given(method("POST"))
            .and(body_json(serde_json::json!([{
                "timestamp": "2023-11-14T22:13:20Z",
                "src_ip": "10.0.0.2",
                "dst_ip": "10.0.0.1",
                "src_port": null,
                "dst_port": 80,
                "protocol": "TCP",
                "payload": null,
                "payload_size": 60,
                "metadata": {
                    "source": "tshark:file:/tmp/a.pcap",
                    "frame_number": null
                }
            }])))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        sink_for(&server).deliver(&[rec]).await.unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = sink_for(&server).deliver(&[record(1)]).await.unwrap_err();
        match err {
            DeliveryError::Rejected { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid api key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_body_is_truncated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("é".repeat(800)))
            .mount(&server)
            .await;

        let err = sink_for(&server).deliver(&[record(1)]).await.unwrap_err();
        match err {
            DeliveryError::Rejected { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body.chars().count(), MAX_ERROR_BODY_CHARS);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_redirect_is_rejected_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/network_packets"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}/elsewhere", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(path("/elsewhere"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = sink_for(&server).deliver(&[record(1)]).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Rejected { status: 302, .. }));
    }

    #[tokio::test]
    async fn test_empty_batch_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        sink_for(&server).deliver(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = format!("http://127.0.0.1:{}/rest/v1/t", port);

        let mut config = RestSinkConfig::new(url, "k");
        config.timeout = Duration::from_secs(2);
        let sink = RestSink::new(config).unwrap();

        let err = sink.deliver(&[record(1)]).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
    }

    #[test]
    fn test_config_for_table() {
        let storage = StorageTarget {
            endpoint: "https://db.example.com/rest/v1".to_string(),
            api_key: "k".to_string(),
            timeout: Duration::from_secs(7),
        };
        let config = RestSinkConfig::for_table(&storage, "network_packets");
        assert_eq!(config.url, "https://db.example.com/rest/v1/network_packets");
        assert_eq!(config.timeout, Duration::from_secs(7));
        assert!(config.user_agent.starts_with("netfeed/"));
    }
}
