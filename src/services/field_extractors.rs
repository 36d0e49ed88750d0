//! Pattern-extraction tier. Every extractor is a pure function over the
//! document text: ordered regex list, first match wins, a miss is `None`.
//! Running all extractors over the same text is deterministic and safe.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{BillingPeriod, InverterDetails, Pricing, ProposalData, UtilityBillData};
use crate::utils::{parse_bill_date, parse_number, round_to};

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("invalid field pattern"))
        .collect()
}

fn first_capture<'t>(patterns: &[Regex], text: &'t str) -> Option<&'t str> {
    for pattern in patterns {
        if let Some(caps) = pattern.captures(text) {
            if let Some(m) = caps.get(1) {
                return Some(m.as_str());
            }
        }
    }
    None
}

static SYSTEM_SIZE: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)system\s+size[:\s]+([\d.,]+)\s*k\s*w",
        r"(?i)([\d.,]+)\s*k\s*w\s+(?:dc\s+)?system",
        r"(?i)total\s+(?:system\s+)?capacity[:\s]+([\d.,]+)\s*k\s*w",
    ])
});

static PANEL_WATTAGE: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)(\d{3})\s*(?:w|watt)s?\s+(?:panel|module)",
        r"(?i)(?:panel|module)s?\s+(?:rated\s+)?(?:at\s+)?(\d{3})\s*(?:w|watt)",
    ])
});

static PANEL_QUANTITY: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)\((\d{1,3})\)\s+(?:panel|module)s",
        r"(?i)(\d{1,3})\s+(?:x\s+)?(?:panel|module)s",
        r"(?i)(?:panel|module)\s+(?:qty|quantity|count)[:\s]+(\d{1,3})",
    ])
});

static PANEL_TYPE: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[r"(?i)(monocrystalline|polycrystalline|thin[\s-]?film|bifacial)"])
});

static ANNUAL_PRODUCTION: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)(?:estimated|annual|year\s*(?:1|one))\s+(?:annual\s+)?production[:\s]+([\d,]+)\s*k\s*wh",
        r"(?i)produces?\s+(?:approximately\s+)?([\d,]+)\s*k\s*wh\s+(?:per|each|a)\s+year",
    ])
});

static INVERTER_TYPE: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[r"(?i)(micro[\s-]?inverter|string\s+inverter|power\s+optimizer|hybrid\s+inverter)"])
});

static TOTAL_COST: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)(?:total|gross)\s+(?:system\s+)?(?:cost|price|investment)[:\s]+\$?\s*([\d,]+(?:\.\d{1,2})?)",
        r"(?i)(?:contract|purchase)\s+price[:\s]+\$?\s*([\d,]+(?:\.\d{1,2})?)",
    ])
});

static FEDERAL_CREDIT: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)(?:federal\s+(?:tax\s+)?credit|itc)[:\s(]+(?:30%\)?[:\s]+)?\$?\s*([\d,]+(?:\.\d{1,2})?)",
    ])
});

static STATE_REBATES: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[r"(?i)state\s+(?:rebates?|incentives?)[:\s]+\$?\s*([\d,]+(?:\.\d{1,2})?)"])
});

static NET_COST: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[r"(?i)net\s+(?:system\s+)?(?:cost|price|investment)[:\s]+\$?\s*([\d,]+(?:\.\d{1,2})?)"])
});

static UTILITY_COMPANY: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)(pacific\s+gas\s+(?:and|&)\s+electric|pg&e|southern\s+california\s+edison|san\s+diego\s+gas\s+(?:and|&)\s+electric|duke\s+energy|con\s*edison|xcel\s+energy|national\s+grid|dominion\s+energy|georgia\s+power|florida\s+power\s+(?:and|&)\s+light)",
    ])
});

static ACCOUNT_NUMBER: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[r"(?i)account\s+(?:number|no\.?|#)[:\s]+([\d-]{6,20})"])
});

static TOTAL_AMOUNT: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)(?:total\s+amount\s+due|amount\s+due|total\s+due)[:\s]+\$?\s*([\d,]+(?:\.\d{1,2})?)",
        r"(?i)total\s+(?:current\s+)?charges[:\s]+\$?\s*([\d,]+(?:\.\d{1,2})?)",
    ])
});

static ENERGY_USAGE: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)(?:total\s+)?(?:energy\s+)?(?:usage|used|consumption)[:\s]+([\d,]+(?:\.\d+)?)\s*k\s*wh",
        r"(?i)([\d,]+(?:\.\d+)?)\s*k\s*wh\s+used",
    ])
});

static RATE: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)(?:rate|price)\s+(?:per\s+k\s*wh)?[:\s]+\$?\s*(\d?\.\d{2,5})",
        r"(?i)\$\s*(\d?\.\d{2,5})\s*(?:per|/)\s*k\s*wh",
    ])
});

static DEMAND_CHARGES: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[r"(?i)demand\s+charges?[:\s]+\$?\s*([\d,]+(?:\.\d{1,2})?)"])
});

static TAXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[r"(?i)taxes?(?:\s+(?:and|&)\s+surcharges?)?[:\s]+\$?\s*([\d,]+(?:\.\d{1,2})?)"])
});

static FEES: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[r"(?i)(?:service\s+)?fees?[:\s]+\$?\s*([\d,]+(?:\.\d{1,2})?)"])
});

static BILLING_PERIOD: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)billing\s+period[:\s]+(\d{1,2}/\d{1,2}/\d{2,4})\s*(?:-|–|to|through)\s*(\d{1,2}/\d{1,2}/\d{2,4})",
        r"(?i)(?:service|statement)\s+(?:period|dates?)[:\s]+(\d{1,2}[/-]\d{1,2}[/-]\d{2,4})\s*(?:-|–|to|through)\s*(\d{1,2}[/-]\d{1,2}[/-]\d{2,4})",
    ])
});

pub fn extract_system_size(text: &str) -> Option<f64> {
    first_capture(&SYSTEM_SIZE, text).and_then(parse_number)
}

pub fn extract_panel_wattage(text: &str) -> Option<u32> {
    first_capture(&PANEL_WATTAGE, text)
        .and_then(parse_number)
        .map(|v| v as u32)
}

pub fn extract_panel_quantity(text: &str) -> Option<u32> {
    first_capture(&PANEL_QUANTITY, text)
        .and_then(parse_number)
        .map(|v| v as u32)
}

pub fn extract_panel_type(text: &str) -> Option<String> {
    first_capture(&PANEL_TYPE, text).map(|s| s.to_lowercase())
}

pub fn extract_annual_production(text: &str) -> Option<f64> {
    first_capture(&ANNUAL_PRODUCTION, text).and_then(parse_number)
}

pub fn extract_inverter_type(text: &str) -> Option<String> {
    first_capture(&INVERTER_TYPE, text).map(|s| s.to_lowercase())
}

pub fn extract_total_cost(text: &str) -> Option<f64> {
    first_capture(&TOTAL_COST, text).and_then(parse_number)
}

pub fn extract_federal_credit(text: &str) -> Option<f64> {
    first_capture(&FEDERAL_CREDIT, text).and_then(parse_number)
}

pub fn extract_state_rebates(text: &str) -> Option<f64> {
    first_capture(&STATE_REBATES, text).and_then(parse_number)
}

pub fn extract_net_cost(text: &str) -> Option<f64> {
    first_capture(&NET_COST, text).and_then(parse_number)
}

pub fn extract_utility_company(text: &str) -> Option<String> {
    first_capture(&UTILITY_COMPANY, text).map(normalize_spaces)
}

pub fn extract_account_number(text: &str) -> Option<String> {
    first_capture(&ACCOUNT_NUMBER, text).map(|s| s.to_string())
}

pub fn extract_total_amount(text: &str) -> Option<f64> {
    first_capture(&TOTAL_AMOUNT, text).and_then(parse_number)
}

pub fn extract_energy_usage(text: &str) -> Option<f64> {
    first_capture(&ENERGY_USAGE, text).and_then(parse_number)
}

pub fn extract_rate(text: &str) -> Option<f64> {
    first_capture(&RATE, text).and_then(parse_number)
}

pub fn extract_demand_charges(text: &str) -> Option<f64> {
    first_capture(&DEMAND_CHARGES, text).and_then(parse_number)
}

pub fn extract_taxes(text: &str) -> Option<f64> {
    first_capture(&TAXES, text).and_then(parse_number)
}

pub fn extract_fees(text: &str) -> Option<f64> {
    first_capture(&FEES, text).and_then(parse_number)
}

pub fn extract_billing_period(text: &str) -> Option<BillingPeriod> {
    for pattern in BILLING_PERIOD.iter() {
        if let Some(caps) = pattern.captures(text) {
            let start = caps.get(1).and_then(|m| parse_bill_date(m.as_str()));
            let end = caps.get(2).and_then(|m| parse_bill_date(m.as_str()));
            if let (Some(start_date), Some(end_date)) = (start, end) {
                return Some(BillingPeriod { start_date, end_date });
            }
        }
    }
    None
}

fn normalize_spaces(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Runs every proposal extractor over the text.
pub fn extract_proposal_fields(text: &str) -> ProposalData {
    let pricing = Pricing {
        total_cost: extract_total_cost(text),
        federal_tax_credit: extract_federal_credit(text),
        state_rebates: extract_state_rebates(text),
        other_incentives: None,
        net_cost: extract_net_cost(text),
    };
    let has_pricing = pricing.total_cost.is_some()
        || pricing.federal_tax_credit.is_some()
        || pricing.state_rebates.is_some()
        || pricing.net_cost.is_some();

    ProposalData {
        system_size_kw: extract_system_size(text),
        panel_type: extract_panel_type(text),
        panel_wattage: extract_panel_wattage(text),
        panel_quantity: extract_panel_quantity(text),
        estimated_annual_production_kwh: extract_annual_production(text),
        monthly_production: None,
        inverter: extract_inverter_type(text).map(|kind| InverterDetails {
            kind: Some(kind),
            model: None,
            quantity: None,
        }),
        pricing: has_pricing.then_some(pricing),
    }
}

/// Runs every bill extractor over the text. When direct rate extraction
/// misses but total amount and usage both hit, the rate is back-derived.
pub fn extract_utility_fields(text: &str) -> UtilityBillData {
    let total_amount = extract_total_amount(text);
    let energy_usage = extract_energy_usage(text);
    let rate = extract_rate(text).or_else(|| match (total_amount, energy_usage) {
        (Some(total), Some(usage)) if usage > 0.0 => Some(round_to(total / usage, 4)),
        _ => None,
    });

    UtilityBillData {
        utility_company: extract_utility_company(text),
        billing_period: extract_billing_period(text),
        account_number: extract_account_number(text),
        total_amount,
        energy_usage_kwh: energy_usage,
        monthly_usage: None,
        rate_per_kwh: rate,
        demand_charges: extract_demand_charges(text),
        taxes: extract_taxes(text),
        fees: extract_fees(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const PROPOSAL_TEXT: &str = "\
        Solar Installation Proposal\n\
        System Size: 8.4 kW\n\
        24 panels, monocrystalline, each panel rated at 350 W\n\
        Micro-inverter configuration\n\
        Estimated Annual Production: 12,600 kWh\n\
        Total System Cost: $25,200.00\n\
        Federal Tax Credit (30%): $7,560\n\
        State Rebate: $1,000\n\
        Net Cost: $16,640\n";

    const BILL_TEXT: &str = "\
        Pacific Gas & Electric\n\
        Account Number: 1234567890\n\
        Billing Period: 01/15/2024 - 02/13/2024\n\
        Total Usage: 850 kWh\n\
        Rate per kWh: $0.22\n\
        Taxes and Surcharges: $12.40\n\
        Total Amount Due: $199.40\n";

    #[test]
    fn extracts_proposal_fields() {
        let data = extract_proposal_fields(PROPOSAL_TEXT);
        assert_eq!(data.system_size_kw, Some(8.4));
        assert_eq!(data.panel_wattage, Some(350));
        assert_eq!(data.panel_quantity, Some(24));
        assert_eq!(data.panel_type.as_deref(), Some("monocrystalline"));
        assert_eq!(data.estimated_annual_production_kwh, Some(12600.0));
        let pricing = data.pricing.expect("pricing");
        assert_eq!(pricing.total_cost, Some(25200.0));
        assert_eq!(pricing.federal_tax_credit, Some(7560.0));
        assert_eq!(pricing.state_rebates, Some(1000.0));
        assert_eq!(pricing.net_cost, Some(16640.0));
        let inverter = data.inverter.expect("inverter");
        assert_eq!(inverter.kind.as_deref(), Some("micro-inverter"));
    }

    #[test]
    fn extracts_bill_fields() {
        let data = extract_utility_fields(BILL_TEXT);
        assert_eq!(
            data.utility_company.as_deref(),
            Some("Pacific Gas & Electric")
        );
        assert_eq!(data.account_number.as_deref(), Some("1234567890"));
        assert_eq!(data.total_amount, Some(199.40));
        assert_eq!(data.energy_usage_kwh, Some(850.0));
        assert_eq!(data.rate_per_kwh, Some(0.22));
        assert_eq!(data.taxes, Some(12.40));
        let period = data.billing_period.expect("billing period");
        assert_eq!(period.start_date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(period.end_date, NaiveDate::from_ymd_opt(2024, 2, 13).unwrap());
    }

    #[test]
    fn rate_is_back_derived_when_not_printed() {
        let text = "Total Amount Due: $150.00\nTotal Usage: 1,000 kWh\n";
        let data = extract_utility_fields(text);
        assert_eq!(data.rate_per_kwh, Some(0.15));
    }

    #[test]
    fn extraction_is_idempotent() {
        let first = extract_proposal_fields(PROPOSAL_TEXT);
        let second = extract_proposal_fields(PROPOSAL_TEXT);
        assert_eq!(first.system_size_kw, second.system_size_kw);
        assert_eq!(first.panel_quantity, second.panel_quantity);
        let a = extract_utility_fields(BILL_TEXT);
        let b = extract_utility_fields(BILL_TEXT);
        assert_eq!(a.total_amount, b.total_amount);
        assert_eq!(a.rate_per_kwh, b.rate_per_kwh);
    }

    #[test]
    fn misses_return_none_not_errors() {
        let data = extract_proposal_fields("nothing relevant in here");
        assert!(data.system_size_kw.is_none());
        assert!(data.pricing.is_none());
        let bill = extract_utility_fields("");
        assert!(bill.total_amount.is_none());
        assert!(bill.rate_per_kwh.is_none());
    }

    #[test]
    fn dash_tolerant_billing_period() {
        let text = "Service Period: 03-01-2024 to 03-31-2024";
        let period = extract_billing_period(text).expect("period");
        assert_eq!(period.start_date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }
}
