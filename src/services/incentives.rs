//! Incentive-lookup adapter: SREC program eligibility and rates per
//! jurisdiction, with a fixed offline rate table and the same masking rule as
//! the other estimation adapters.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::IncentiveProgram;
use crate::services::estimates::{Estimate, ADAPTER_TIMEOUT};

/// Jurisdictions with an active SREC market and their approximate credit
/// rates in $/MWh. Everything else is ineligible.
const SREC_RATES: [(&str, f64); 9] = [
    ("NJ", 225.0),
    ("MA", 280.0),
    ("MD", 75.0),
    ("PA", 40.0),
    ("OH", 10.0),
    ("DC", 400.0),
    ("IL", 70.0),
    ("VA", 45.0),
    ("DE", 30.0),
];

#[derive(Debug, Clone)]
pub struct IncentiveData {
    pub srec_eligible: bool,
    pub srec_rate_per_mwh: f64,
    pub estimated_annual_value: f64,
    pub program_description: String,
    pub additional_programs: Vec<IncentiveProgram>,
}

#[derive(Deserialize)]
struct IncentiveResponse {
    srec_eligible: bool,
    srec_rate_per_mwh: f64,
    program_description: String,
    #[serde(default)]
    additional_programs: Vec<ApiProgram>,
}

#[derive(Deserialize)]
struct ApiProgram {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    estimated_value: f64,
    description: String,
}

pub struct IncentiveClient {
    base_url: Option<String>,
    client: reqwest::Client,
}

impl IncentiveClient {
    /// `base_url = None` means no live pricing service is configured and the
    /// fixed rate table answers every lookup.
    pub fn new(base_url: Option<String>) -> Self {
        IncentiveClient {
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
            client: reqwest::Client::builder()
                .timeout(ADAPTER_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    pub async fn fetch(
        &self,
        state: &str,
        system_capacity_kw: f64,
        annual_production_kwh: f64,
    ) -> Estimate<IncentiveData> {
        let Some(base_url) = self.base_url.as_deref() else {
            debug!("incentive adapter not configured; using offline rate table");
            return Estimate::offline(offline_incentive_data(state, annual_production_kwh));
        };

        match self
            .fetch_live(base_url, state, system_capacity_kw, annual_production_kwh)
            .await
        {
            Ok(data) => Estimate::live(data),
            Err(err) => {
                warn!(error = %err, "incentive lookup failed; masking with offline rate table");
                Estimate::offline(offline_incentive_data(state, annual_production_kwh))
            }
        }
    }

    async fn fetch_live(
        &self,
        base_url: &str,
        state: &str,
        system_capacity_kw: f64,
        annual_production_kwh: f64,
    ) -> Result<IncentiveData> {
        let url = format!(
            "{base_url}/v1/incentives?state={state}&capacity_kw={system_capacity_kw}&annual_kwh={annual_production_kwh}"
        );
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("incentive service status {}", response.status()));
        }
        let body: IncentiveResponse = response.json().await?;
        Ok(IncentiveData {
            srec_eligible: body.srec_eligible,
            srec_rate_per_mwh: body.srec_rate_per_mwh,
            estimated_annual_value: annual_srec_value(
                annual_production_kwh,
                body.srec_rate_per_mwh,
            ),
            program_description: body.program_description,
            additional_programs: body
                .additional_programs
                .into_iter()
                .map(|p| IncentiveProgram {
                    name: p.name,
                    kind: p.kind,
                    estimated_value: p.estimated_value,
                    description: p.description,
                })
                .collect(),
        })
    }
}

/// One SREC per MWh generated.
fn annual_srec_value(annual_production_kwh: f64, rate_per_mwh: f64) -> f64 {
    (annual_production_kwh / 1000.0) * rate_per_mwh
}

pub fn offline_incentive_data(state: &str, annual_production_kwh: f64) -> IncentiveData {
    let state = state.trim().to_uppercase();
    let rate = SREC_RATES
        .iter()
        .find(|(code, _)| *code == state)
        .map(|(_, rate)| *rate);

    match rate {
        Some(rate_per_mwh) => IncentiveData {
            srec_eligible: true,
            srec_rate_per_mwh: rate_per_mwh,
            estimated_annual_value: annual_srec_value(annual_production_kwh, rate_per_mwh),
            program_description: format!(
                "{state} operates an SREC market: each MWh of solar generation earns one \
                 tradable credit, currently valued around ${rate_per_mwh:.0}/MWh."
            ),
            additional_programs: additional_programs_for(&state),
        },
        None => IncentiveData {
            srec_eligible: false,
            srec_rate_per_mwh: 0.0,
            estimated_annual_value: 0.0,
            program_description: format!(
                "{state} does not currently operate an SREC market; production-based credits \
                 are not available in this jurisdiction."
            ),
            additional_programs: additional_programs_for(&state),
        },
    }
}

fn additional_programs_for(state: &str) -> Vec<IncentiveProgram> {
    match state {
        "MA" => vec![IncentiveProgram {
            name: "SMART adder".to_string(),
            kind: "production-incentive".to_string(),
            estimated_value: 600.0,
            description: "Per-kWh adder under the Solar Massachusetts Renewable Target program"
                .to_string(),
        }],
        "NY" => vec![IncentiveProgram {
            name: "NY-Sun rebate".to_string(),
            kind: "rebate".to_string(),
            estimated_value: 1500.0,
            description: "Upfront per-watt rebate administered by NYSERDA".to_string(),
        }],
        "CA" => vec![IncentiveProgram {
            name: "SGIP storage rebate".to_string(),
            kind: "rebate".to_string(),
            estimated_value: 1000.0,
            description: "Self-Generation Incentive Program rebate for paired storage".to_string(),
        }],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn eligible_state_gets_rate_and_value() {
        let client = IncentiveClient::new(None);
        let estimate = client.fetch("NJ", 10.0, 14000.0).await;
        assert!(!estimate.success);
        assert!(estimate.data.srec_eligible);
        assert_eq!(estimate.data.srec_rate_per_mwh, 225.0);
        assert_eq!(estimate.data.estimated_annual_value, 14.0 * 225.0);
        assert!(!estimate.data.program_description.is_empty());
    }

    #[tokio::test]
    async fn texas_is_ineligible_with_explanation() {
        let client = IncentiveClient::new(None);
        let estimate = client.fetch("TX", 10.0, 14000.0).await;
        assert!(!estimate.data.srec_eligible);
        assert_eq!(estimate.data.srec_rate_per_mwh, 0.0);
        assert_eq!(estimate.data.estimated_annual_value, 0.0);
        assert!(!estimate.data.program_description.is_empty());
    }

    #[tokio::test]
    async fn live_failure_is_masked() {
        let client = IncentiveClient::new(Some("http://127.0.0.1:9".to_string()));
        let estimate = client.fetch("MA", 8.0, 11200.0).await;
        assert!(!estimate.success);
        assert!(estimate.data.srec_eligible);
        assert_eq!(estimate.data.srec_rate_per_mwh, 280.0);
    }

    #[test]
    fn state_lookup_is_case_insensitive() {
        let data = offline_incentive_data("nj", 10000.0);
        assert!(data.srec_eligible);
    }
}
