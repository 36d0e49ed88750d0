//! Production-simulation adapter (PVWatts v8 shape) with an offline seasonal
//! generator. Live failures are logged and masked.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::Location;
use crate::services::analysis::PRODUCTION_SEASONAL;
use crate::services::estimates::{Estimate, ADAPTER_TIMEOUT, OFFLINE_ANNUAL_YIELD_KWH_PER_KW};

const HOURS_PER_YEAR: f64 = 8760.0;

/// Fixed array parameters for residential roof mounts.
pub const DEFAULT_AZIMUTH_DEGREES: f64 = 180.0;
pub const DEFAULT_TILT_DEGREES: f64 = 20.0;
pub const DEFAULT_SYSTEM_LOSSES_PERCENT: f64 = 14.08;
const ARRAY_TYPE_ROOF_MOUNT: u8 = 1;
const MODULE_TYPE_STANDARD: u8 = 0;

#[derive(Debug, Clone)]
pub struct ProductionData {
    pub annual_kwh: f64,
    pub monthly_kwh: [f64; 12],
    /// Ratio of actual output to continuous full-rated output.
    pub capacity_factor: f64,
}

#[derive(Deserialize)]
struct PvWattsResponse {
    outputs: PvWattsOutputs,
}

#[derive(Deserialize)]
struct PvWattsOutputs {
    ac_annual: f64,
    ac_monthly: Vec<f64>,
    capacity_factor: f64,
}

pub struct ProductionSimClient {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl ProductionSimClient {
    pub fn new(api_key: Option<String>) -> Self {
        ProductionSimClient {
            api_key,
            base_url: "https://developer.nrel.gov".to_string(),
            client: reqwest::Client::builder()
                .timeout(ADAPTER_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn with_base_url(api_key: Option<String>, base_url: &str) -> Self {
        let mut client = Self::new(api_key);
        client.base_url = base_url.trim_end_matches('/').to_string();
        client
    }

    pub async fn fetch(&self, system_capacity_kw: f64, location: Location) -> Estimate<ProductionData> {
        let Some(api_key) = self.api_key.as_deref() else {
            debug!("production-simulation adapter not configured; using offline generator");
            return Estimate::offline(offline_production_data(system_capacity_kw));
        };

        match self.fetch_live(api_key, system_capacity_kw, location).await {
            Ok(data) => Estimate::live(data),
            Err(err) => {
                warn!(error = %err, "production simulation failed; masking with offline data");
                Estimate::offline(offline_production_data(system_capacity_kw))
            }
        }
    }

    async fn fetch_live(
        &self,
        api_key: &str,
        system_capacity_kw: f64,
        location: Location,
    ) -> Result<ProductionData> {
        let url = format!(
            "{}/api/pvwatts/v8.json?api_key={}&system_capacity={}&lat={}&lon={}&azimuth={}&tilt={}&array_type={}&module_type={}&losses={}",
            self.base_url,
            api_key,
            system_capacity_kw,
            location.latitude,
            location.longitude,
            DEFAULT_AZIMUTH_DEGREES,
            DEFAULT_TILT_DEGREES,
            ARRAY_TYPE_ROOF_MOUNT,
            MODULE_TYPE_STANDARD,
            DEFAULT_SYSTEM_LOSSES_PERCENT,
        );
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "production simulation status {}",
                response.status()
            ));
        }
        let body: PvWattsResponse = response.json().await?;
        if body.outputs.ac_monthly.len() != 12 {
            return Err(anyhow!(
                "expected 12 monthly values, got {}",
                body.outputs.ac_monthly.len()
            ));
        }
        let mut monthly = [0.0; 12];
        monthly.copy_from_slice(&body.outputs.ac_monthly);

        Ok(ProductionData {
            annual_kwh: body.outputs.ac_annual,
            monthly_kwh: monthly,
            // PVWatts reports the factor as a percentage.
            capacity_factor: body.outputs.capacity_factor / 100.0,
        })
    }
}

/// Applies the fixed seasonal distribution against the location-independent
/// annual yield average.
pub fn offline_production_data(system_capacity_kw: f64) -> ProductionData {
    let annual_kwh = system_capacity_kw * OFFLINE_ANNUAL_YIELD_KWH_PER_KW;
    let monthly_kwh = PRODUCTION_SEASONAL.map(|share| annual_kwh * share);
    let capacity_factor = if system_capacity_kw > 0.0 {
        annual_kwh / (system_capacity_kw * HOURS_PER_YEAR)
    } else {
        0.0
    };
    ProductionData {
        annual_kwh,
        monthly_kwh,
        capacity_factor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_client_serves_offline_schema() {
        let client = ProductionSimClient::new(None);
        let estimate = client
            .fetch(
                10.0,
                Location {
                    latitude: 36.7,
                    longitude: -119.8,
                },
            )
            .await;
        assert!(!estimate.success);
        assert_eq!(estimate.data.annual_kwh, 14000.0);
        let monthly_sum: f64 = estimate.data.monthly_kwh.iter().sum();
        assert!((monthly_sum - estimate.data.annual_kwh).abs() < 1.0);
        assert!(estimate.data.capacity_factor > 0.1 && estimate.data.capacity_factor < 0.25);
    }

    #[tokio::test]
    async fn live_failure_is_masked() {
        let client =
            ProductionSimClient::with_base_url(Some("key".to_string()), "http://127.0.0.1:9");
        let estimate = client
            .fetch(
                8.0,
                Location {
                    latitude: 40.0,
                    longitude: -74.0,
                },
            )
            .await;
        assert!(!estimate.success);
        assert_eq!(estimate.data.annual_kwh, 8.0 * 1400.0);
    }

    #[test]
    fn summer_months_out_produce_winter_months() {
        let data = offline_production_data(10.0);
        // June/July vs December/January
        assert!(data.monthly_kwh[5] > data.monthly_kwh[11]);
        assert!(data.monthly_kwh[6] > data.monthly_kwh[0]);
    }
}
