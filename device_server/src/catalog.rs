//! Catalog-store client for the device inventory.
//!
//! The store is the system of record; this service is a coordination layer.
//! Policy: 10s timeout, no retry on 4xx, two exponential-backoff retries on
//! 5xx and connection errors.

use reqwest::StatusCode;
use std::time::Duration;
use tracing::warn;

use opshub_core::models::device::{
  ConnectionInfo, Device, DeviceCreateRequest, DeviceFilter, DeviceListPage, DeviceUpdateRequest,
};
use opshub_core::CoreError;

const CATALOG_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRIES: u32 = 2;
const BACKOFF_BASE_MS: u64 = 200;

#[derive(Clone)]
pub struct CatalogDeviceClient {
  base_url: String,
  client: reqwest::Client,
}

impl CatalogDeviceClient {
  pub fn new(base_url: impl Into<String>) -> Self {
    let client = reqwest::Client::builder()
      .timeout(CATALOG_TIMEOUT)
      .connect_timeout(CATALOG_TIMEOUT)
      .build()
      .unwrap_or_default();
    Self {
      base_url: base_url.into(),
      client,
    }
  }

  fn devices_url(&self) -> String {
    format!("{}/api/v1/storage/devices", self.base_url)
  }

  /// Run a request with the retry policy. The builder closure is invoked
  /// fresh per attempt so bodies are re-serialized, not replayed.
  async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response, CoreError>
  where
    F: Fn() -> reqwest::RequestBuilder,
  {
    let mut attempt = 0u32;
    loop {
      let result = build().send().await;
      match result {
        Ok(response) if response.status().is_server_error() => {
          if attempt >= MAX_RETRIES {
            return Err(CoreError::storage_unavailable(format!(
              "catalog returned {}",
              response.status()
            )));
          }
          warn!(
            status = %response.status(),
            attempt, "Catalog request failed; retrying"
          );
        }
        Ok(response) => return Ok(response),
        Err(e) if e.is_connect() || e.is_timeout() => {
          if attempt >= MAX_RETRIES {
            return Err(CoreError::storage_unavailable(e.to_string()));
          }
          warn!(attempt, "Catalog unreachable ({}); retrying", e);
        }
        Err(e) => return Err(CoreError::storage_unavailable(e.to_string())),
      }
      attempt += 1;
      tokio::time::sleep(Duration::from_millis(
        BACKOFF_BASE_MS * 2u64.saturating_pow(attempt - 1),
      ))
      .await;
    }
  }

  async fn reject_client_error(response: reqwest::Response) -> Result<reqwest::Response, CoreError> {
    let status = response.status();
    if !status.is_client_error() {
      return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(match status {
      StatusCode::NOT_FOUND => CoreError::NotFound("device not found".to_string()),
      StatusCode::CONFLICT => CoreError::Conflict(message),
      StatusCode::BAD_REQUEST => CoreError::validation(message),
      _ => CoreError::storage_unavailable(format!("catalog returned {status}: {message}")),
    })
  }

  pub async fn list(&self, filter: &DeviceFilter) -> Result<DeviceListPage, CoreError> {
    let mut query: Vec<(&str, String)> = Vec::new();
    if let Some(group_id) = &filter.group_id {
      query.push(("groupId", group_id.clone()));
    }
    if let Some(status) = &filter.status {
      query.push(("status", status.as_str().to_string()));
    }
    if let Some(device_type) = &filter.device_type {
      query.push(("type", serde_json::to_value(device_type)?.as_str().unwrap_or_default().to_string()));
    }
    if let Some(tags) = &filter.tags {
      query.push(("tags", tags.clone()));
    }
    query.push(("limit", filter.limit.unwrap_or(50).to_string()));
    query.push(("offset", filter.offset.unwrap_or(0).to_string()));

    let url = self.devices_url();
    let response = self
      .send_with_retry(|| self.client.get(&url).query(&query))
      .await?;
    let response = Self::reject_client_error(response).await?;
    response
      .json()
      .await
      .map_err(|e| CoreError::storage_unavailable(e.to_string()))
  }

  pub async fn get(&self, id: &str) -> Result<Option<Device>, CoreError> {
    let url = format!("{}/{}", self.devices_url(), id);
    let response = self.send_with_retry(|| self.client.get(&url)).await?;
    if response.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    let response = Self::reject_client_error(response).await?;
    let device = response
      .json()
      .await
      .map_err(|e| CoreError::storage_unavailable(e.to_string()))?;
    Ok(Some(device))
  }

  pub async fn create(&self, request: &DeviceCreateRequest) -> Result<Device, CoreError> {
    let url = self.devices_url();
    let body = serde_json::to_value(CreateBody::from(request))?;
    let response = self
      .send_with_retry(|| self.client.post(&url).json(&body))
      .await?;
    let response = Self::reject_client_error(response).await?;
    response
      .json()
      .await
      .map_err(|e| CoreError::storage_unavailable(e.to_string()))
  }

  pub async fn update(&self, id: &str, request: &DeviceUpdateRequest) -> Result<Device, CoreError> {
    let url = format!("{}/{}", self.devices_url(), id);
    let body = serde_json::to_value(UpdateBody::from(request))?;
    let response = self
      .send_with_retry(|| self.client.put(&url).json(&body))
      .await?;
    let response = Self::reject_client_error(response).await?;
    response
      .json()
      .await
      .map_err(|e| CoreError::storage_unavailable(e.to_string()))
  }

  pub async fn delete(&self, id: &str) -> Result<(), CoreError> {
    let url = format!("{}/{}", self.devices_url(), id);
    let response = self.send_with_retry(|| self.client.delete(&url)).await?;
    Self::reject_client_error(response).await?;
    Ok(())
  }

  /// Probe-engine-only endpoint: secrets come back in the clear.
  pub async fn get_decrypted_connection_info(
    &self,
    id: &str,
  ) -> Result<Option<ConnectionInfo>, CoreError> {
    let url = format!("{}/{}/connection-info/decrypted", self.devices_url(), id);
    let response = self.send_with_retry(|| self.client.get(&url)).await?;
    if response.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    let response = Self::reject_client_error(response).await?;
    let info = response
      .json()
      .await
      .map_err(|e| CoreError::storage_unavailable(e.to_string()))?;
    Ok(Some(info))
  }
}

// Wire bodies the catalog store accepts. Kept separate from the inbound DTOs
// so serde derives stay one-directional.
#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
  name: &'a str,
  #[serde(rename = "type")]
  device_type: &'a opshub_core::models::device::DeviceType,
  #[serde(skip_serializing_if = "Option::is_none")]
  group_id: Option<&'a String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  connection_info: Option<&'a ConnectionInfo>,
  tags: &'a [String],
  metadata: &'a std::collections::HashMap<String, serde_json::Value>,
}

impl<'a> From<&'a DeviceCreateRequest> for CreateBody<'a> {
  fn from(req: &'a DeviceCreateRequest) -> Self {
    Self {
      name: &req.name,
      device_type: &req.device_type,
      group_id: req.group_id.as_ref(),
      connection_info: req.connection_info.as_ref(),
      tags: &req.tags,
      metadata: &req.metadata,
    }
  }
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBody<'a> {
  #[serde(skip_serializing_if = "Option::is_none")]
  name: Option<&'a String>,
  #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
  device_type: Option<&'a opshub_core::models::device::DeviceType>,
  #[serde(skip_serializing_if = "Option::is_none")]
  status: Option<&'a opshub_core::models::device::DeviceStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  group_id: Option<&'a String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  connection_info: Option<&'a ConnectionInfo>,
  #[serde(skip_serializing_if = "Option::is_none")]
  tags: Option<&'a Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  metadata: Option<&'a std::collections::HashMap<String, serde_json::Value>>,
}

impl<'a> From<&'a DeviceUpdateRequest> for UpdateBody<'a> {
  fn from(req: &'a DeviceUpdateRequest) -> Self {
    Self {
      name: req.name.as_ref(),
      device_type: req.device_type.as_ref(),
      status: req.status.as_ref(),
      group_id: req.group_id.as_ref(),
      connection_info: req.connection_info.as_ref(),
      tags: req.tags.as_ref(),
      metadata: req.metadata.as_ref(),
    }
  }
}
