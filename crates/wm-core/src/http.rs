//! HTTP implementation of [`RemoteDataset`].
//!
//! A dataset URL serves its feature table as JSON (the serde shape of
//! [`FeatureTable`]). Edits go to the same URL:
//!
//! | Edit | Request |
//! |------|---------|
//! | add | `POST {url}` with the feature as JSON; the reply names the stored `object_id` |
//! | update | `PUT {url}/{object_id}` with the feature as JSON |
//! | delete | `DELETE {url}/{object_id}` |
//!
//! Download progress is derived from `Content-Length`; servers that do not
//! send one only report 100% at the end.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wm_core::{EventBus, HttpRemote};
//!
//! # fn example() -> Result<(), wm_core::Error> {
//! let bus = Arc::new(EventBus::new());
//! let remote = HttpRemote::new(
//!     bus,
//!     "https://gis.example.org/secchi_observations",
//!     "https://gis.example.org/secchi_locations",
//! )?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use wm_types::{DatasetKind, Feature, FeatureTable, RecordId};

use crate::bus::{Channel, EventBus};
use crate::error::{Error, Result};
use crate::messages::{DatasetRequest, EditOp};
use crate::remote::{
    RemoteDataset, publish_edit_outcome, publish_progress, publish_ready, publish_unavailable,
};

/// Remote dataset served over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    bus: Arc<EventBus>,
    observations_url: String,
    locations_url: String,
}

impl HttpRemote {
    /// Create a client for the two dataset endpoints.
    pub fn new(
        bus: Arc<EventBus>,
        observations_url: impl Into<String>,
        locations_url: impl Into<String>,
    ) -> Result<Self> {
        let observations_url = normalize(observations_url.into())?;
        let locations_url = normalize(locations_url.into())?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            bus,
            observations_url,
            locations_url,
        })
    }

    fn url(&self, dataset: DatasetKind) -> &str {
        match dataset {
            DatasetKind::Observations => &self.observations_url,
            DatasetKind::Locations => &self.locations_url,
        }
    }

    async fn download(
        &self,
        request: &DatasetRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<FeatureTable>> {
        let mut builder = self.client.get(&request.url);
        if request.force_refresh {
            builder = builder.header(reqwest::header::CACHE_CONTROL, "no-cache");
        }

        let mut response = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            r = builder.send() => r?.error_for_status()?,
        };

        let total = response.content_length().filter(|&n| n > 0);
        let mut body = Vec::with_capacity(total.unwrap_or(0).min(64 * 1024 * 1024) as usize);
        let mut last_percent = 0u8;

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                c = response.chunk() => c?,
            };
            let Some(chunk) = chunk else { break };
            body.extend_from_slice(&chunk);

            if let Some(total) = total {
                let percent = ((body.len() as u64 * 100) / total).min(99) as u8;
                if percent > last_percent {
                    last_percent = percent;
                    publish_progress(&self.bus, request, percent);
                }
            }
        }
        publish_progress(&self.bus, request, 100);

        let table: FeatureTable = serde_json::from_slice(&body)?;
        Ok(Some(table))
    }

    async fn send_edit(
        &self,
        method: Method,
        dataset: DatasetKind,
        id: Option<RecordId>,
        feature: Option<&Feature>,
    ) -> Result<String> {
        let url = match id {
            Some(id) => format!("{}/{}", self.url(dataset), id),
            None => self.url(dataset).to_string(),
        };
        debug!("{} {}", method, url);

        let mut builder = self.client.request(method, &url);
        if let Some(feature) = feature {
            builder = builder.json(feature);
        }
        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::remote(format!("{status}: {body}")));
        }
        Ok(response.text().await.unwrap_or_default())
    }
}

/// Body of a successful add.
#[derive(Debug, Deserialize)]
struct Created {
    object_id: RecordId,
}

/// Id the server stored an added feature under, or `sent` when the reply
/// does not say.
fn assigned_id(body: &str, sent: RecordId) -> RecordId {
    match serde_json::from_str::<Created>(body) {
        Ok(created) => created.object_id,
        Err(e) => {
            debug!("Add reply carries no object_id ({}), keeping {}", e, sent);
            sent
        }
    }
}

fn normalize(url: String) -> Result<String> {
    let url = url.trim_end_matches('/').to_string();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(Error::invalid_config(format!(
            "dataset URL '{url}' must start with http:// or https://"
        )));
    }
    Ok(url)
}

#[async_trait]
impl RemoteDataset for HttpRemote {
    async fn request_dataset(&self, request: DatasetRequest, cancel: CancellationToken) {
        match self.download(&request, &cancel).await {
            Ok(Some(table)) => publish_ready(&self.bus, &request, table),
            Ok(None) => debug!("Download of {} cancelled", request.name),
            Err(e) => publish_unavailable(&self.bus, &request, e.to_string()),
        }
    }

    async fn add_feature(&self, dataset: DatasetKind, feature: Feature, channel: Channel) {
        let outcome = self
            .send_edit(Method::POST, dataset, None, Some(&feature))
            .await
            .map(|body| assigned_id(&body, feature.object_id))
            .map_err(|e| e.to_string());
        publish_edit_outcome(
            &self.bus,
            dataset,
            EditOp::Add,
            feature.object_id,
            channel,
            outcome,
        );
    }

    async fn update_feature(&self, dataset: DatasetKind, feature: Feature, channel: Channel) {
        let outcome = self
            .send_edit(Method::PUT, dataset, Some(feature.object_id), Some(&feature))
            .await
            .map(|_| feature.object_id)
            .map_err(|e| e.to_string());
        publish_edit_outcome(
            &self.bus,
            dataset,
            EditOp::Update,
            feature.object_id,
            channel,
            outcome,
        );
    }

    async fn delete_feature(&self, dataset: DatasetKind, id: RecordId, channel: Channel) {
        let outcome = self
            .send_edit(Method::DELETE, dataset, Some(id), None)
            .await
            .map(|_| id)
            .map_err(|e| e.to_string());
        publish_edit_outcome(&self.bus, dataset, EditOp::Delete, id, channel, outcome);
    }
}
