//! Reconciliation engine: combines proposal data, utility-bill data and the
//! three estimation adapters into one analysis result, with graceful
//! degradation at every step. Owns the result lifecycle
//! (pending -> completed | error, exactly once).

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{
    month_series, AnalysisData, EnvironmentalImpact, Location, MonthlyBreakdownEntry,
    ProposalRecord, ResultRecord, ResultStatus, Settings, SolarPotential, SolarProduction,
    SolarSavings, SrecIncentives, UtilityBillRecord, MONTH_NAMES,
};
use crate::services::estimates::OFFLINE_ANNUAL_YIELD_KWH_PER_KW;
use crate::services::incentives::IncentiveClient;
use crate::services::openai::{DbExtractionAudit, ExtractionAudit, OpenAiExtractor};
use crate::services::production_sim::ProductionSimClient;
use crate::services::roof_potential::RoofPotentialClient;
use crate::utils::now_rfc3339;

/// Residential consumption shape: peaks in summer (cooling) and winter
/// (heating). Sums to 1.
pub const USAGE_SEASONAL: [f64; 12] = [
    0.095, 0.085, 0.075, 0.065, 0.070, 0.090, 0.110, 0.115, 0.090, 0.070, 0.065, 0.070,
];

/// Solar yield shape: peaks in summer only. Sums to 1. Kept distinct from
/// [`USAGE_SEASONAL`]; consumption and generation do not follow the same
/// curve.
pub const PRODUCTION_SEASONAL: [f64; 12] = [
    0.050, 0.060, 0.080, 0.095, 0.110, 0.115, 0.115, 0.110, 0.095, 0.080, 0.050, 0.040,
];

// Domain constants, not configuration.
pub const DEFAULT_CARBON_FACTOR_KG_PER_MWH: f64 = 680.0;
pub const PANEL_LIFETIME_YEARS: f64 = 25.0;
pub const TREES_PER_TON: f64 = 45.0;
pub const MILES_PER_TON: f64 = 2500.0;
pub const COAL_POUNDS_PER_KWH: f64 = 0.9;

const UTILITY_INFLATION_RATE: f64 = 0.025;
const DEFAULT_SYSTEM_SIZE_KW: f64 = 10.0;
const DEFAULT_MONTHLY_USAGE_KWH: f64 = 1000.0;
const DEFAULT_RATE_PER_KWH: f64 = 0.15;
const FALLBACK_COST_PER_KW: f64 = 3000.0;

/// Deterministic location fallback (Fresno, CA) used when neither an override
/// nor a profile location is available, so repeated generations for the same
/// unresolved user agree.
const DEFAULT_LOCATION: Location = Location {
    latitude: 36.7378,
    longitude: -119.7871,
};
const DEFAULT_STATE: &str = "CA";

pub struct AnalysisEngine {
    db: Arc<Mutex<Database>>,
    ai: OpenAiExtractor,
    roof: RoofPotentialClient,
    production: ProductionSimClient,
    incentives: IncentiveClient,
    audit: Arc<dyn ExtractionAudit>,
}

impl AnalysisEngine {
    pub fn new(db: Arc<Mutex<Database>>, settings: &Settings) -> Self {
        let audit: Arc<dyn ExtractionAudit> = Arc::new(DbExtractionAudit::new(db.clone()));
        AnalysisEngine {
            ai: OpenAiExtractor::new(settings.openai_api_key.clone()),
            roof: RoofPotentialClient::new(settings.solar_api_key.clone()),
            production: ProductionSimClient::new(settings.pvwatts_api_key.clone()),
            incentives: IncentiveClient::new(None),
            db,
            audit,
        }
    }

    /// Component injection for tests and alternative wiring.
    pub fn with_components(
        db: Arc<Mutex<Database>>,
        ai: OpenAiExtractor,
        roof: RoofPotentialClient,
        production: ProductionSimClient,
        incentives: IncentiveClient,
        audit: Arc<dyn ExtractionAudit>,
    ) -> Self {
        AnalysisEngine {
            db,
            ai,
            roof,
            production,
            incentives,
            audit,
        }
    }

    /// Generates one analysis for a (proposal, bill) pair. A pending record
    /// is persisted before any computation; a failure during reconciliation
    /// finalizes it to error and the placeholder is retained for audit.
    pub async fn generate(
        &self,
        proposal_id: &str,
        utility_bill_id: &str,
        user_id: &str,
        location_override: Option<Location>,
    ) -> Result<ResultRecord> {
        let (proposal, bill, profile) = {
            let db = self.lock_db()?;
            let proposal = db.get_proposal(proposal_id)?.ok_or_else(|| Error::NotFound {
                resource: "proposal",
                id: proposal_id.to_string(),
            })?;
            let bill = db
                .get_utility_bill(utility_bill_id)?
                .ok_or_else(|| Error::NotFound {
                    resource: "utility bill",
                    id: utility_bill_id.to_string(),
                })?;
            // Records owned by someone else are indistinguishable from absent.
            if proposal.user_id != user_id {
                return Err(Error::NotFound {
                    resource: "proposal",
                    id: proposal_id.to_string(),
                });
            }
            if bill.user_id != user_id {
                return Err(Error::NotFound {
                    resource: "utility bill",
                    id: utility_bill_id.to_string(),
                });
            }
            let profile = db.get_user_profile(user_id)?;
            (proposal, bill, profile)
        };

        let record = ResultRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            proposal_id: proposal_id.to_string(),
            utility_bill_id: utility_bill_id.to_string(),
            status: ResultStatus::Pending,
            analysis: None,
            processing_errors: Vec::new(),
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
        };
        {
            let db = self.lock_db()?;
            db.insert_result(&record)?;
        }

        let location = location_override
            .or_else(|| {
                profile.as_ref().and_then(|p| match (p.latitude, p.longitude) {
                    (Some(latitude), Some(longitude)) => Some(Location {
                        latitude,
                        longitude,
                    }),
                    _ => None,
                })
            })
            .unwrap_or(DEFAULT_LOCATION);
        let state = profile
            .as_ref()
            .and_then(|p| p.state.clone())
            .unwrap_or_else(|| DEFAULT_STATE.to_string());

        match self.compute(&proposal, &bill, location, &state).await {
            Ok(analysis) => {
                let db = self.lock_db()?;
                db.finalize_result(&record.id, ResultStatus::Completed, Some(&analysis), &[])?;
                info!(result_id = %record.id, "analysis completed");
            }
            Err(err) => {
                warn!(result_id = %record.id, error = %err, "analysis failed");
                let db = self.lock_db()?;
                db.finalize_result(
                    &record.id,
                    ResultStatus::Error,
                    None,
                    &[err.to_string()],
                )?;
            }
        }

        let db = self.lock_db()?;
        db.get_result(&record.id)?.ok_or_else(|| Error::NotFound {
            resource: "analysis result",
            id: record.id.clone(),
        })
    }

    async fn compute(
        &self,
        proposal: &ProposalRecord,
        bill: &UtilityBillRecord,
        location: Location,
        state: &str,
    ) -> Result<AnalysisData> {
        let system_size_kw = proposal
            .extracted
            .system_size_kw
            .unwrap_or(DEFAULT_SYSTEM_SIZE_KW);
        let monthly_usage_kwh = bill
            .extracted
            .energy_usage_kwh
            .unwrap_or(DEFAULT_MONTHLY_USAGE_KWH);
        let rate_per_kwh = bill
            .extracted
            .rate_per_kwh
            .unwrap_or(DEFAULT_RATE_PER_KWH);
        let production_hint = proposal
            .extracted
            .estimated_annual_production_kwh
            .unwrap_or(system_size_kw * OFFLINE_ANNUAL_YIELD_KWH_PER_KW);

        // The three adapters have no data dependency on each other.
        let (roof, production, incentives) = tokio::join!(
            self.roof.fetch(location),
            self.production.fetch(system_size_kw, location),
            self.incentives.fetch(state, system_size_kw, production_hint),
        );
        if !roof.success || !production.success || !incentives.success {
            info!(
                roof_live = roof.success,
                production_live = production.success,
                incentives_live = incentives.success,
                "one or more estimation adapters answered from offline generators"
            );
        }

        let environmental_impact = match self
            .ai
            .estimate_environmental_impact(
                system_size_kw,
                production.data.annual_kwh,
                Some(state),
                self.audit.as_ref(),
            )
            .await
        {
            Some(impact) => impact,
            None => {
                let factor = if roof.data.carbon_offset_factor_kg_per_mwh > 0.0 {
                    roof.data.carbon_offset_factor_kg_per_mwh
                } else {
                    DEFAULT_CARBON_FACTOR_KG_PER_MWH
                };
                environmental_from_factor(
                    production.data.annual_kwh,
                    factor,
                    "calculated",
                    format!(
                        "Derived from a regional grid intensity of {factor:.0} kg CO2/MWh \
                         over an assumed {PANEL_LIFETIME_YEARS:.0}-year panel lifetime."
                    ),
                )
            }
        };

        let usage_monthly = monthly_values(bill.extracted.monthly_usage.as_deref())
            .unwrap_or_else(|| derive_monthly_from_annual(monthly_usage_kwh * 12.0, &USAGE_SEASONAL));
        let production_monthly = if production.data.monthly_kwh.iter().any(|v| *v > 0.0) {
            production.data.monthly_kwh
        } else {
            derive_monthly_from_annual(production.data.annual_kwh, &PRODUCTION_SEASONAL)
        };

        let monthly_breakdown =
            build_monthly_breakdown(&usage_monthly, &production_monthly, rate_per_kwh);

        let net_system_cost = proposal
            .extracted
            .pricing
            .as_ref()
            .and_then(|p| p.net_cost)
            .unwrap_or(system_size_kw * FALLBACK_COST_PER_KW);
        let solar_savings = aggregate_savings(&monthly_breakdown, net_system_cost);

        Ok(AnalysisData {
            solar_savings,
            monthly_breakdown,
            environmental_impact,
            solar_potential: SolarPotential {
                segments: roof.data.segments,
                total_potential_kwh: roof.data.annual_yield_kwh,
                panel_capacity_watts: roof.data.panel_capacity_watts,
                carbon_offset_factor_kg_per_mwh: roof.data.carbon_offset_factor_kg_per_mwh,
            },
            solar_production: SolarProduction {
                annual_kwh: production.data.annual_kwh,
                monthly_kwh: month_series(&production_monthly),
                capacity_factor: production.data.capacity_factor,
            },
            srec_incentives: SrecIncentives {
                eligible: incentives.data.srec_eligible,
                rate_per_mwh: incentives.data.srec_rate_per_mwh,
                estimated_annual_value: incentives.data.estimated_annual_value,
                program_description: incentives.data.program_description,
                additional_programs: incentives.data.additional_programs,
            },
        })
    }

    pub fn get_result(&self, result_id: &str, requester_id: &str) -> Result<ResultRecord> {
        let db = self.lock_db()?;
        let record = db.get_result(result_id)?.ok_or_else(|| Error::NotFound {
            resource: "analysis result",
            id: result_id.to_string(),
        })?;
        if record.user_id != requester_id {
            return Err(Error::Forbidden);
        }
        Ok(record)
    }

    /// Ownership-gated delete. Terminal or pending alike; regeneration always
    /// creates new records, so deletion never mutates lifecycle state.
    pub fn delete_result(&self, result_id: &str, requester_id: &str, admin: bool) -> Result<()> {
        let db = self.lock_db()?;
        let record = db.get_result(result_id)?.ok_or_else(|| Error::NotFound {
            resource: "analysis result",
            id: result_id.to_string(),
        })?;
        if record.user_id != requester_id && !admin {
            return Err(Error::Forbidden);
        }
        db.delete_result(result_id)?;
        Ok(())
    }

    /// Deleting a proposal leaves existing results' references intact as
    /// historical pointers.
    pub fn delete_proposal(&self, proposal_id: &str, requester_id: &str, admin: bool) -> Result<()> {
        let db = self.lock_db()?;
        let record = db.get_proposal(proposal_id)?.ok_or_else(|| Error::NotFound {
            resource: "proposal",
            id: proposal_id.to_string(),
        })?;
        if record.user_id != requester_id && !admin {
            return Err(Error::Forbidden);
        }
        db.delete_proposal(proposal_id)?;
        Ok(())
    }

    pub fn delete_utility_bill(
        &self,
        utility_bill_id: &str,
        requester_id: &str,
        admin: bool,
    ) -> Result<()> {
        let db = self.lock_db()?;
        let record = db
            .get_utility_bill(utility_bill_id)?
            .ok_or_else(|| Error::NotFound {
                resource: "utility bill",
                id: utility_bill_id.to_string(),
            })?;
        if record.user_id != requester_id && !admin {
            return Err(Error::Forbidden);
        }
        db.delete_utility_bill(utility_bill_id)?;
        Ok(())
    }

    fn lock_db(&self) -> Result<std::sync::MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| Error::Storage("database lock poisoned".to_string()))
    }
}

fn monthly_values(series: Option<&[crate::models::MonthValue]>) -> Option<[f64; 12]> {
    let series = series?;
    if series.len() != 12 {
        return None;
    }
    let mut values = [0.0; 12];
    for (slot, entry) in values.iter_mut().zip(series.iter()) {
        *slot = entry.kwh;
    }
    Some(values)
}

pub fn derive_monthly_from_annual(annual: f64, shares: &[f64; 12]) -> [f64; 12] {
    shares.map(|share| annual * share)
}

/// Builds the 12-entry breakdown. Grid consumption is clamped at zero when
/// production exceeds usage; export credits are out of scope.
pub fn build_monthly_breakdown(
    usage_kwh: &[f64; 12],
    production_kwh: &[f64; 12],
    rate_per_kwh: f64,
) -> Vec<MonthlyBreakdownEntry> {
    MONTH_NAMES
        .iter()
        .enumerate()
        .map(|(i, month)| {
            let usage = usage_kwh[i];
            let production = production_kwh[i];
            let grid_consumption = (usage - production).max(0.0);
            let without_solar = usage * rate_per_kwh;
            let with_solar = grid_consumption * rate_per_kwh;
            MonthlyBreakdownEntry {
                month: (*month).to_string(),
                solar_production_kwh: production,
                grid_consumption_kwh: grid_consumption,
                utility_bill_with_solar: with_solar,
                utility_bill_without_solar: without_solar,
                savings: without_solar - with_solar,
            }
        })
        .collect()
}

pub fn aggregate_savings(
    breakdown: &[MonthlyBreakdownEntry],
    net_system_cost: f64,
) -> SolarSavings {
    let annual_savings: f64 = breakdown.iter().map(|entry| entry.savings).sum();
    let payback_period_years = if annual_savings > 0.0 {
        Some(net_system_cost / annual_savings)
    } else {
        None
    };
    SolarSavings {
        monthly_savings: annual_savings / 12.0,
        annual_savings,
        twenty_year_savings: twenty_year_savings(annual_savings),
        payback_period_years,
    }
}

/// First-year savings compounded over 20 years at the fixed nominal utility
/// inflation assumption.
pub fn twenty_year_savings(annual_savings: f64) -> f64 {
    (0..20)
        .map(|year| annual_savings * (1.0 + UTILITY_INFLATION_RATE).powi(year))
        .sum()
}

pub fn environmental_from_factor(
    annual_production_kwh: f64,
    factor_kg_per_mwh: f64,
    data_source: &str,
    explanation: String,
) -> EnvironmentalImpact {
    let annual_tons = (annual_production_kwh / 1000.0) * (factor_kg_per_mwh / 1000.0);
    EnvironmentalImpact {
        carbon_offset_annual_tons: annual_tons,
        carbon_offset_lifetime_tons: annual_tons * PANEL_LIFETIME_YEARS,
        trees_planted_equivalent: annual_tons * TREES_PER_TON,
        miles_not_driven_equivalent: annual_tons * MILES_PER_TON,
        coal_not_burned_pounds: annual_production_kwh * COAL_POUNDS_PER_KWH,
        carbon_offset_factor_kg_per_mwh: factor_kg_per_mwh,
        data_source: data_source.to_string(),
        explanation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seasonal_tables_are_normalized_and_distinct() {
        let usage_sum: f64 = USAGE_SEASONAL.iter().sum();
        let production_sum: f64 = PRODUCTION_SEASONAL.iter().sum();
        assert!((usage_sum - 1.0).abs() < 1e-9);
        assert!((production_sum - 1.0).abs() < 1e-9);
        assert_ne!(USAGE_SEASONAL, PRODUCTION_SEASONAL);
        // Consumption carries a winter shoulder that production lacks.
        assert!(USAGE_SEASONAL[0] > PRODUCTION_SEASONAL[0]);
        assert!(USAGE_SEASONAL[11] > PRODUCTION_SEASONAL[11]);
    }

    #[test]
    fn worked_scenario_matches_expected_savings() {
        // 10 kW, 1000 kWh/month at $0.15, uniform production 1166.67 kWh/month.
        let usage = [1000.0; 12];
        let production = [14000.0 / 12.0; 12];
        let breakdown = build_monthly_breakdown(&usage, &production, 0.15);

        for entry in &breakdown {
            assert_eq!(entry.grid_consumption_kwh, 0.0);
            assert!((entry.utility_bill_without_solar - 150.0).abs() < 1e-9);
            assert_eq!(entry.utility_bill_with_solar, 0.0);
            assert!((entry.savings - 150.0).abs() < 1e-9);
        }

        let savings = aggregate_savings(&breakdown, 10.0 * 3000.0);
        assert!((savings.annual_savings - 1800.0).abs() < 1e-6);
        assert!((savings.monthly_savings - 150.0).abs() < 1e-6);
        assert!(savings.twenty_year_savings > 36_000.0);
        let payback = savings.payback_period_years.expect("payback");
        assert!((payback - 30000.0 / 1800.0).abs() < 1e-6);
    }

    #[test]
    fn annual_savings_equal_sum_of_monthly_entries() {
        let usage = derive_monthly_from_annual(10800.0, &USAGE_SEASONAL);
        let production = derive_monthly_from_annual(12000.0, &PRODUCTION_SEASONAL);
        let breakdown = build_monthly_breakdown(&usage, &production, 0.22);
        let savings = aggregate_savings(&breakdown, 25000.0);
        let summed: f64 = breakdown.iter().map(|e| e.savings).sum();
        assert!((savings.annual_savings - summed).abs() < 0.01);
    }

    #[test]
    fn grid_consumption_never_negative() {
        let usage = [100.0; 12];
        let production = [500.0; 12];
        let breakdown = build_monthly_breakdown(&usage, &production, 0.15);
        assert!(breakdown.iter().all(|e| e.grid_consumption_kwh >= 0.0));
    }

    #[test]
    fn twenty_year_savings_compound_above_linear() {
        let annual = 1800.0;
        assert!(twenty_year_savings(annual) > annual * 20.0);
        assert_eq!(twenty_year_savings(0.0), 0.0);
    }

    #[test]
    fn zero_savings_leaves_payback_undefined() {
        let usage = [0.0; 12];
        let production = [0.0; 12];
        let breakdown = build_monthly_breakdown(&usage, &production, 0.15);
        let savings = aggregate_savings(&breakdown, 30000.0);
        assert_eq!(savings.annual_savings, 0.0);
        assert!(savings.payback_period_years.is_none());
    }

    #[test]
    fn environmental_factor_math() {
        let impact = environmental_from_factor(14000.0, 680.0, "calculated", "test".to_string());
        assert!((impact.carbon_offset_annual_tons - 9.52).abs() < 1e-9);
        assert!((impact.carbon_offset_lifetime_tons - 238.0).abs() < 1e-9);
        assert!((impact.trees_planted_equivalent - 428.4).abs() < 1e-6);
        assert!((impact.miles_not_driven_equivalent - 23800.0).abs() < 1e-6);
        assert!((impact.coal_not_burned_pounds - 12600.0).abs() < 1e-6);
    }
}
