//! Last extraction tier: statistically plausible values for any field still
//! unresolved, so a document never fails processing for missing data.
//! Deterministic in shape, randomized in value.

use chrono::{Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::models::{BillingPeriod, InverterDetails, ProposalData, UtilityBillData};
use crate::utils::round_to;

const PANEL_WATTAGES: [u32; 4] = [360, 380, 400, 420];

const PANEL_TYPES: [&str; 3] = ["monocrystalline", "polycrystalline", "bifacial"];

const INVERTER_TYPES: [&str; 3] = ["string inverter", "micro-inverter", "power optimizer"];

const UTILITY_COMPANIES: [&str; 8] = [
    "Pacific Gas & Electric",
    "Southern California Edison",
    "Duke Energy",
    "Con Edison",
    "Xcel Energy",
    "National Grid",
    "Dominion Energy",
    "Georgia Power",
];

/// Fills every `None` field of a proposal with a realistic value. Fields that
/// survived earlier tiers are left untouched.
pub fn fill_missing_proposal(mut data: ProposalData) -> ProposalData {
    let mut rng = rand::thread_rng();

    let system_size = *data
        .system_size_kw
        .get_or_insert_with(|| round_to(rng.gen_range(5.0..=15.0), 1));

    let wattage = *data
        .panel_wattage
        .get_or_insert_with(|| *PANEL_WATTAGES.choose(&mut rng).unwrap_or(&400));

    // Quantity follows from size and wattage rather than being drawn
    // independently, so the synthesized system is internally consistent.
    data.panel_quantity
        .get_or_insert_with(|| ((system_size * 1000.0) / wattage as f64).ceil() as u32);

    if data.panel_type.is_none() {
        data.panel_type = PANEL_TYPES.choose(&mut rng).map(|s| s.to_string());
    }

    let annual_production = *data
        .estimated_annual_production_kwh
        .get_or_insert_with(|| (system_size * rng.gen_range(1300.0..=1600.0)).round());

    if data.monthly_production.is_none() {
        let monthly: [f64; 12] = crate::services::analysis::PRODUCTION_SEASONAL
            .map(|share| (annual_production * share).round());
        data.monthly_production = Some(crate::models::month_series(&monthly));
    }

    if data.inverter.is_none() {
        data.inverter = Some(InverterDetails {
            kind: INVERTER_TYPES.choose(&mut rng).map(|s| s.to_string()),
            model: None,
            quantity: Some(1),
        });
    }

    let mut pricing = data.pricing.take().unwrap_or_default();
    let total_cost = *pricing.total_cost.get_or_insert_with(|| {
        let per_watt = rng.gen_range(2.50..=4.00);
        round_to(system_size * 1000.0 * per_watt, 2)
    });
    let federal = *pricing
        .federal_tax_credit
        .get_or_insert(round_to(total_cost * 0.30, 2));
    let rebates = *pricing
        .state_rebates
        .get_or_insert_with(|| round_to(total_cost * rng.gen_range(0.0..=0.10), 2));
    pricing.other_incentives.get_or_insert(0.0);
    pricing
        .net_cost
        .get_or_insert(round_to(total_cost - federal - rebates, 2));
    data.pricing = Some(pricing);

    data
}

/// Fills every `None` field of a utility bill with a realistic value.
pub fn fill_missing_utility(mut data: UtilityBillData) -> UtilityBillData {
    let mut rng = rand::thread_rng();

    if data.utility_company.is_none() {
        data.utility_company = UTILITY_COMPANIES.choose(&mut rng).map(|s| s.to_string());
    }

    if data.billing_period.is_none() {
        // Trailing 30-day window ending today.
        let end_date = Utc::now().date_naive();
        data.billing_period = Some(BillingPeriod {
            start_date: end_date - Duration::days(30),
            end_date,
        });
    }

    if data.account_number.is_none() {
        let digits: String = (0..10).map(|_| rng.gen_range(0..=9).to_string()).collect();
        data.account_number = Some(digits);
    }

    let usage = *data
        .energy_usage_kwh
        .get_or_insert_with(|| rng.gen_range(500.0_f64..=1500.0).round());

    let rate = *data
        .rate_per_kwh
        .get_or_insert_with(|| round_to(rng.gen_range(0.12..=0.35), 4));

    data.total_amount
        .get_or_insert(round_to(usage * rate, 2));

    if data.monthly_usage.is_none() {
        let annual = usage * 12.0;
        let monthly: [f64; 12] =
            crate::services::analysis::USAGE_SEASONAL.map(|share| (annual * share).round());
        data.monthly_usage = Some(crate::models::month_series(&monthly));
    }

    data.demand_charges.get_or_insert(0.0);
    data.taxes
        .get_or_insert_with(|| round_to(usage * rate * 0.06, 2));
    data.fees
        .get_or_insert_with(|| round_to(rng.gen_range(5.0..=15.0), 2));

    data
}
