//! Outbound federation requests (§4.8): signed envelopes sent over a pooled
//! `reqwest::Client`, retried with backoff on `NETWORK` failures.

use std::time::Duration;

use construct_crypto::ServerSigningKey;
use construct_runtime::Backoff;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::dns::FederationResolver;
use crate::envelope::Envelope;
use crate::error::{FedError, FedResult};
use crate::keys::ServerKeyClient;
use crate::peer::PeerPool;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retry_max: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_max: 4,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
        }
    }
}

pub struct FederationClient {
    http: Client,
    resolver: FederationResolver,
    pub keys: ServerKeyClient,
    peers: PeerPool,
    signing_key: ServerSigningKey,
    local_host: String,
    retry: RetryPolicy,
}

impl FederationClient {
    pub fn new(signing_key: ServerSigningKey, local_host: impl Into<String>) -> FedResult<Self> {
        let local_host = local_host.into();
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(FedError::from)?;
        Ok(Self {
            keys: ServerKeyClient::new(http.clone(), local_host.clone()),
            http,
            resolver: FederationResolver::new(crate::dns::ResolverSettings::default()),
            peers: PeerPool::new(),
            signing_key,
            local_host,
            retry: RetryPolicy::default(),
        })
    }

    pub fn peers(&self) -> &PeerPool {
        &self.peers
    }

    /// Sends `envelope` to `destination`, retrying `NETWORK`/`TIMEOUT`
    /// failures with exponential backoff up to `retry_max` attempts.
    async fn send(&self, destination: &str, envelope: Envelope) -> FedResult<Value> {
        if self.peers.is_erroneous(destination) {
            return Err(FedError::Network(format!("{destination} is marked erroneous")));
        }

        let mut backoff = Backoff::new(self.retry.base_delay, self.retry.max_delay);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.send_once(destination, &envelope).await {
                Ok(value) => {
                    self.peers.record_success(destination, 0, 0);
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempts < self.retry.retry_max => {
                    self.peers.record_error(destination, &err.to_string());
                    tokio::time::sleep(backoff.next_delay()).await;
                }
                Err(err) => {
                    self.peers.record_error(destination, &err.to_string());
                    return Err(err);
                }
            }
        }
    }

    async fn send_once(&self, destination: &str, envelope: &Envelope) -> FedResult<Value> {
        let resolved = self
            .resolver
            .resolve(destination)
            .await
            .map_err(|err| FedError::Network(err.to_string()))?;
        let url = format!("https://{}{}", resolved.addr, envelope.uri);
        let header = envelope.authorization_header(&self.signing_key);

        let mut request = self
            .http
            .request(
                envelope.method.parse().map_err(|_| FedError::Protocol("bad method".into()))?,
                url,
            )
            .header("Authorization", header)
            .header("Host", destination);
        if let Some(content) = &envelope.content {
            request = request.json(content);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(FedError::Network(format!("{destination} returned {}", response.status())));
        }
        response.json().await.map_err(FedError::from)
    }

    fn envelope(&self, method: &str, uri: impl Into<String>, destination: &str, content: Option<Value>) -> Envelope {
        Envelope::new(method, uri, self.local_host.clone(), destination, content)
    }

    pub async fn version(&self, destination: &str) -> FedResult<Value> {
        let envelope = self.envelope("GET", "/_matrix/federation/v1/version", destination, None);
        self.send(destination, envelope).await
    }

    pub async fn send_transaction(&self, destination: &str, txn_id: &str, pdus: Vec<Value>) -> FedResult<Value> {
        let content = json!({
            "origin": self.local_host,
            "origin_server_ts": construct_types::Timestamp::now().as_millis(),
            "pdus": pdus,
        });
        let envelope = self.envelope(
            "PUT",
            format!("/_matrix/federation/v1/send/{txn_id}"),
            destination,
            Some(content),
        );
        self.send(destination, envelope).await
    }

    pub async fn event(&self, destination: &str, event_id: &str) -> FedResult<Value> {
        let envelope = self.envelope(
            "GET",
            format!("/_matrix/federation/v1/event/{event_id}"),
            destination,
            None,
        );
        self.send(destination, envelope).await
    }

    pub async fn event_auth(&self, destination: &str, room_id: &str, event_id: &str) -> FedResult<Value> {
        let envelope = self.envelope(
            "GET",
            format!("/_matrix/federation/v1/event_auth/{room_id}/{event_id}"),
            destination,
            None,
        );
        self.send(destination, envelope).await
    }

    pub async fn state(&self, destination: &str, room_id: &str, event_id: &str) -> FedResult<Value> {
        let envelope = self.envelope(
            "GET",
            format!("/_matrix/federation/v1/state/{room_id}?event_id={event_id}"),
            destination,
            None,
        );
        self.send(destination, envelope).await
    }

    pub async fn state_ids(&self, destination: &str, room_id: &str, event_id: &str) -> FedResult<Value> {
        let envelope = self.envelope(
            "GET",
            format!("/_matrix/federation/v1/state_ids/{room_id}?event_id={event_id}"),
            destination,
            None,
        );
        self.send(destination, envelope).await
    }

    pub async fn backfill(&self, destination: &str, room_id: &str, limit: u32, v: &[String]) -> FedResult<Value> {
        let v_query = v.join("&v=");
        let envelope = self.envelope(
            "GET",
            format!("/_matrix/federation/v1/backfill/{room_id}?limit={limit}&v={v_query}"),
            destination,
            None,
        );
        self.send(destination, envelope).await
    }

    pub async fn make_join(&self, destination: &str, room_id: &str, user_id: &str) -> FedResult<Value> {
        let envelope = self.envelope(
            "GET",
            format!("/_matrix/federation/v1/make_join/{room_id}/{user_id}"),
            destination,
            None,
        );
        self.send(destination, envelope).await
    }

    pub async fn send_join(&self, destination: &str, room_id: &str, event_id: &str, event: Value) -> FedResult<Value> {
        let envelope = self.envelope(
            "PUT",
            format!("/_matrix/federation/v1/send_join/{room_id}/{event_id}"),
            destination,
            Some(event),
        );
        self.send(destination, envelope).await
    }

    pub async fn invite(&self, destination: &str, room_id: &str, event_id: &str, event: Value) -> FedResult<Value> {
        let envelope = self.envelope(
            "PUT",
            format!("/_matrix/federation/v1/invite/{room_id}/{event_id}"),
            destination,
            Some(event),
        );
        self.send(destination, envelope).await
    }

    pub async fn query_directory(&self, destination: &str, room_alias: &str) -> FedResult<Value> {
        let envelope = self.envelope(
            "GET",
            format!("/_matrix/federation/v1/query/directory?room_alias={room_alias}"),
            destination,
            None,
        );
        self.send(destination, envelope).await
    }

    pub async fn query_profile(&self, destination: &str, user_id: &str) -> FedResult<Value> {
        let envelope = self.envelope(
            "GET",
            format!("/_matrix/federation/v1/query/profile?user_id={user_id}"),
            destination,
            None,
        );
        self.send(destination, envelope).await
    }

    pub async fn user_devices(&self, destination: &str, user_id: &str) -> FedResult<Value> {
        let envelope = self.envelope(
            "GET",
            format!("/_matrix/federation/v1/user/devices/{user_id}"),
            destination,
            None,
        );
        self.send(destination, envelope).await
    }

    pub async fn public_rooms(&self, destination: &str) -> FedResult<Value> {
        let envelope = self.envelope("GET", "/_matrix/federation/v1/publicRooms", destination, None);
        self.send(destination, envelope).await
    }
}

/// Deserializes a typed response, for callers that want more than a raw
/// [`Value`] from any of the above.
pub fn parse_response<T: DeserializeOwned>(value: Value) -> FedResult<T> {
    serde_json::from_value(value).map_err(|err| FedError::Protocol(err.to_string()))
}
