//! Roof solar-potential adapter (Google Solar API shape) with an offline
//! generator. Live failures are logged and masked per the degradation rule.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::{Location, RoofSegment};
use crate::services::estimates::{Estimate, ADAPTER_TIMEOUT, OFFLINE_ANNUAL_YIELD_KWH_PER_KW};

const DEFAULT_PANEL_CAPACITY_WATTS: f64 = 400.0;
const PANEL_AREA_M2: f64 = 1.95;

#[derive(Debug, Clone)]
pub struct RoofData {
    pub segments: Vec<RoofSegment>,
    pub max_capacity_kw: f64,
    pub annual_yield_kwh: f64,
    pub panel_capacity_watts: f64,
    pub carbon_offset_factor_kg_per_mwh: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildingInsights {
    solar_potential: ApiSolarPotential,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSolarPotential {
    max_array_panels_count: u32,
    panel_capacity_watts: f64,
    carbon_offset_factor_kg_per_mwh: f64,
    #[serde(default)]
    roof_segment_stats: Vec<ApiRoofSegment>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiRoofSegment {
    #[serde(default)]
    pitch_degrees: f64,
    #[serde(default)]
    azimuth_degrees: f64,
    stats: ApiSegmentStats,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSegmentStats {
    area_meters2: f64,
    #[serde(default)]
    sunshine_quantiles: Vec<f64>,
}

pub struct RoofPotentialClient {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl RoofPotentialClient {
    pub fn new(api_key: Option<String>) -> Self {
        RoofPotentialClient {
            api_key,
            base_url: "https://solar.googleapis.com".to_string(),
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

    pub async fn fetch(&self, location: Location) -> Estimate<RoofData> {
        let Some(api_key) = self.api_key.as_deref() else {
            debug!("roof-potential adapter not configured; using offline generator");
            return Estimate::offline(offline_roof_data());
        };

        match self.fetch_live(api_key, location).await {
            Ok(data) => Estimate::live(data),
            Err(err) => {
                warn!(error = %err, "roof-potential service failed; masking with offline data");
                Estimate::offline(offline_roof_data())
            }
        }
    }

    async fn fetch_live(&self, api_key: &str, location: Location) -> Result<RoofData> {
        let url = format!(
            "{}/v1/buildingInsights:findClosest?location.latitude={}&location.longitude={}&key={}",
            self.base_url, location.latitude, location.longitude, api_key
        );
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("roof-potential service status {}", response.status()));
        }
        let insights: BuildingInsights = response.json().await?;
        let potential = insights.solar_potential;

        let segments = potential
            .roof_segment_stats
            .iter()
            .map(|seg| RoofSegment {
                pitch_degrees: seg.pitch_degrees,
                azimuth_degrees: seg.azimuth_degrees,
                area_m2: seg.stats.area_meters2,
                sunshine_quantiles: seg.stats.sunshine_quantiles.clone(),
            })
            .collect();

        let max_capacity_kw =
            potential.max_array_panels_count as f64 * potential.panel_capacity_watts / 1000.0;
        Ok(RoofData {
            segments,
            max_capacity_kw,
            annual_yield_kwh: max_capacity_kw * OFFLINE_ANNUAL_YIELD_KWH_PER_KW,
            panel_capacity_watts: potential.panel_capacity_watts,
            carbon_offset_factor_kg_per_mwh: potential.carbon_offset_factor_kg_per_mwh,
        })
    }
}

/// Fabricates a plausible two-segment roof: a south-facing optimal segment
/// and an east-facing suboptimal one.
pub fn offline_roof_data() -> RoofData {
    let segments = vec![
        RoofSegment {
            pitch_degrees: 22.5,
            azimuth_degrees: 180.0,
            area_m2: 48.0,
            sunshine_quantiles: vec![820.0, 1080.0, 1310.0, 1480.0, 1620.0],
        },
        RoofSegment {
            pitch_degrees: 18.0,
            azimuth_degrees: 90.0,
            area_m2: 32.0,
            sunshine_quantiles: vec![640.0, 860.0, 1040.0, 1210.0, 1350.0],
        },
    ];

    let total_area: f64 = segments.iter().map(|s| s.area_m2).sum();
    let panel_count = (total_area / PANEL_AREA_M2).floor();
    let max_capacity_kw = panel_count * DEFAULT_PANEL_CAPACITY_WATTS / 1000.0;

    RoofData {
        segments,
        max_capacity_kw,
        annual_yield_kwh: max_capacity_kw * OFFLINE_ANNUAL_YIELD_KWH_PER_KW,
        panel_capacity_watts: DEFAULT_PANEL_CAPACITY_WATTS,
        carbon_offset_factor_kg_per_mwh: crate::services::analysis::DEFAULT_CARBON_FACTOR_KG_PER_MWH,
    }
}
