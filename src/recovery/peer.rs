use crate::distribution::InstanceId;
use crate::error::RecoveryError;
use crate::storage::protocol::{ENDPOINT_INSERTED_SINCE, InsertedSinceRequest, InsertedSinceResponse};
use crate::storage::types::{Tuple, TupleStoreName};

use async_trait::async_trait;
use std::time::Duration;

/// Access to the data of another replica.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// All tuples of `table` that `instance` received at or after
    /// `timestamp`, tombstones included.
    async fn inserted_since(
        &self,
        instance: &InstanceId,
        table: &TupleStoreName,
        timestamp: u64,
    ) -> Result<Vec<Tuple>, RecoveryError>;
}

/// Talks to the HTTP surface of other nodes. Instance ids are `host:port`.
pub struct HttpPeerClient {
    http_client: reqwest::Client,
    timeout: Duration,
    attempts: usize,
}

impl Default for HttpPeerClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), 3)
    }
}

impl HttpPeerClient {
    pub fn new(timeout: Duration, attempts: usize) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            timeout,
            attempts: attempts.max(1),
        }
    }

    async fn post_with_retry<T: serde::Serialize>(
        &self,
        url: String,
        payload: &T,
    ) -> Result<reqwest::Response, RecoveryError> {
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            let response = self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(self.timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(RecoveryError::Peer(format!("{}: {}", url, e)));
                    }
                    // Simple jitter to prevent thundering herd
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(RecoveryError::Peer(format!("{}: retry attempts exhausted", url)))
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn inserted_since(
        &self,
        instance: &InstanceId,
        table: &TupleStoreName,
        timestamp: u64,
    ) -> Result<Vec<Tuple>, RecoveryError> {
        let url = format!("http://{}{}", instance, ENDPOINT_INSERTED_SINCE);
        let request = InsertedSinceRequest {
            table: table.to_string(),
            timestamp,
        };

        let response = self.post_with_retry(url, &request).await?;

        if !response.status().is_success() {
            return Err(RecoveryError::Peer(format!(
                "{} answered {} for {}",
                instance,
                response.status(),
                table
            )));
        }

        let body: InsertedSinceResponse = response
            .json()
            .await
            .map_err(|e| RecoveryError::Peer(format!("invalid answer from {}: {}", instance, e)))?;

        Ok(body.tuples)
    }
}
