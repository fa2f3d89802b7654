//! Blocking HTTP plumbing (`ureq`) and the SolarEdge monitoring API client.
//!
//! - One agent per client, global timeout, HTTP statuses handled by us rather
//!   than surfaced as `ureq` errors.
//! - JSON is decoded through `serde_path_to_error` so a schema drift reports
//!   the offending field.

use crate::config::CloudConfig;
use crate::error::ConnectivityError;
use crate::models::cloud::{CloudInventory, InventoryResponse};
use crate::sources::{with_retries, CloudSource};
use crate::utils::truncate;
use http::StatusCode;
use log::debug;
use serde::de::DeserializeOwned;
use std::time::Duration;

const CLOUD: &str = "solaredge-api";

pub(crate) fn agent(timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build();
    config.into()
}

pub(crate) fn map_ureq_error(source_name: &'static str, err: ureq::Error) -> ConnectivityError {
    match err {
        ureq::Error::Timeout(_) => ConnectivityError::Timeout { source_name },
        ureq::Error::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => ConnectivityError::Timeout { source_name },
        ureq::Error::StatusCode(status) => ConnectivityError::Http {
            source_name,
            status,
            message: String::new(),
        },
        other => ConnectivityError::Transport {
            source_name,
            message: other.to_string(),
        },
    }
}

/// Turn a status and body into either a decoded value or a classified error.
pub(crate) fn decode_body<T: DeserializeOwned>(
    source_name: &'static str,
    status: StatusCode,
    body: &str,
) -> Result<T, ConnectivityError> {
    if !status.is_success() {
        return Err(ConnectivityError::Http {
            source_name,
            status: status.as_u16(),
            message: truncate(body.trim(), 200),
        });
    }
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|e| ConnectivityError::Protocol {
        source_name,
        message: format!("{} at {}", e.inner(), e.path()),
    })
}

pub(crate) fn read_json<T: DeserializeOwned>(
    source_name: &'static str,
    mut response: http::Response<ureq::Body>,
) -> Result<T, ConnectivityError> {
    let status = response.status();
    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| map_ureq_error(source_name, e))?;
    decode_body(source_name, status, &body)
}

/// Client for the SolarEdge monitoring API (site inventory only).
pub struct SolarEdgeClient {
    agent: ureq::Agent,
    base_url: String,
    site_id: String,
    api_key: String,
    retries: u32,
    retry_delay: Duration,
}

impl SolarEdgeClient {
    pub fn new(cfg: &CloudConfig) -> Result<Self, ConnectivityError> {
        let (Some(site_id), Some(api_key)) = (cfg.site_id.clone(), cfg.api_key.clone()) else {
            return Err(ConnectivityError::NotConfigured { source_name: CLOUD });
        };
        Ok(SolarEdgeClient {
            agent: agent(Duration::from_secs_f64(cfg.timeout_secs)),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            site_id,
            api_key,
            retries: cfg.retries.saturating_add(1),
            retry_delay: Duration::from_secs_f64(cfg.retry_delay_secs),
        })
    }

    fn inventory_url(&self) -> String {
        format!("{}/site/{}/inventory", self.base_url, self.site_id)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ConnectivityError> {
        let response = self
            .agent
            .get(url)
            .query("api_key", &self.api_key)
            .header("Accept", "application/json")
            .call()
            .map_err(|e| map_ureq_error(CLOUD, e))?;
        read_json(CLOUD, response)
    }
}

impl CloudSource for SolarEdgeClient {
    fn fetch_inventory(&self) -> Result<CloudInventory, ConnectivityError> {
        let url = self.inventory_url();
        debug!("Fetching site inventory from {}", url);
        let raw: InventoryResponse = with_retries(CLOUD, self.retries, self.retry_delay, || self.get_json(&url))?;
        let inventory = CloudInventory::from(raw);
        debug!("Cloud inventory lists {} inverter(s)", inventory.inverters.len());
        Ok(inventory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credentials_are_not_configured() {
        let cfg = CloudConfig {
            enabled: true,
            site_id: Some("12345".to_string()),
            ..CloudConfig::default()
        };
        assert!(matches!(
            SolarEdgeClient::new(&cfg),
            Err(ConnectivityError::NotConfigured { .. })
        ));
    }

    #[test]
    fn inventory_url_has_no_trailing_slash_issues() {
        let cfg = CloudConfig {
            enabled: true,
            base_url: "https://monitoringapi.solaredge.com/".to_string(),
            site_id: Some("12345".to_string()),
            api_key: Some("secret".to_string()),
            ..CloudConfig::default()
        };
        let client = SolarEdgeClient::new(&cfg).unwrap();
        assert_eq!(client.inventory_url(), "https://monitoringapi.solaredge.com/site/12345/inventory");
        assert_eq!(client.retries, 3);
    }

    #[test]
    fn http_errors_are_classified() {
        let err = decode_body::<serde_json::Value>(CLOUD, StatusCode::SERVICE_UNAVAILABLE, "busy").unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("503"));

        let err = decode_body::<serde_json::Value>(CLOUD, StatusCode::FORBIDDEN, "Invalid token").unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn schema_drift_names_the_field() {
        let body = r#"{"Inventory": {"inverters": [{"SN": "7E1", "connectedOptimizers": "many"}]}}"#;
        let err = decode_body::<InventoryResponse>(CLOUD, StatusCode::OK, body).unwrap_err();
        match err {
            ConnectivityError::Protocol { message, .. } => {
                assert!(message.contains("connectedOptimizers"), "{message}");
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn decodes_inventory_body() {
        let body = r#"{"Inventory": {"Inverters": [{"serialNumber": "7E1-AB", "connectedOptimizers": 14}]}}"#;
        let raw: InventoryResponse = decode_body(CLOUD, StatusCode::OK, body).unwrap();
        let inv = CloudInventory::from(raw);
        assert_eq!(inv.optimizer_counts().get("7E1"), Some(&14));
    }
}
