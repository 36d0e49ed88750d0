use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Which extraction tier supplied the primary field of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "pattern-extraction")]
    PatternExtraction,
    #[serde(rename = "fallback-generation")]
    FallbackGeneration,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::OpenAi => "openai",
            DataSource::PatternExtraction => "pattern-extraction",
            DataSource::FallbackGeneration => "fallback-generation",
        }
    }

    pub fn parse(value: &str) -> Option<DataSource> {
        match value {
            "openai" => Some(DataSource::OpenAi),
            "pattern-extraction" => Some(DataSource::PatternExtraction),
            "fallback-generation" => Some(DataSource::FallbackGeneration),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processed,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<DocumentStatus> {
        match value {
            "pending" => Some(DocumentStatus::Pending),
            "processed" => Some(DocumentStatus::Processed),
            "error" => Some(DocumentStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Pending,
    Completed,
    Error,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Pending => "pending",
            ResultStatus::Completed => "completed",
            ResultStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<ResultStatus> {
        match value {
            "pending" => Some(ResultStatus::Pending),
            "completed" => Some(ResultStatus::Completed),
            "error" => Some(ResultStatus::Error),
            _ => None,
        }
    }
}

/// Which extraction path an uploaded file takes, decided from the declared
/// MIME type. The content is not re-sniffed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Image,
}

impl FileKind {
    pub fn from_mime(mime: &str) -> Option<FileKind> {
        if mime.eq_ignore_ascii_case("application/pdf") {
            Some(FileKind::Pdf)
        } else if mime.to_ascii_lowercase().starts_with("image/") {
            Some(FileKind::Image)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Image => "image",
        }
    }
}

/// Document handed over by the upload collaborator.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub path: std::path::PathBuf,
    pub original_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub path: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub sha256: String,
}

/// One entry of an ordered month series, January-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthValue {
    pub month: String,
    pub kwh: f64,
}

pub fn month_series(values: &[f64; 12]) -> Vec<MonthValue> {
    MONTH_NAMES
        .iter()
        .zip(values.iter())
        .map(|(name, kwh)| MonthValue {
            month: (*name).to_string(),
            kwh: *kwh,
        })
        .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InverterDetails {
    pub kind: Option<String>,
    pub model: Option<String>,
    pub quantity: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pricing {
    pub total_cost: Option<f64>,
    pub federal_tax_credit: Option<f64>,
    pub state_rebates: Option<f64>,
    pub other_incentives: Option<f64>,
    pub net_cost: Option<f64>,
}

/// Fields pulled out of a sales proposal. Every field is optional until the
/// synthesis tier has run; a processed record always carries system size and
/// pricing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposalData {
    pub system_size_kw: Option<f64>,
    pub panel_type: Option<String>,
    pub panel_wattage: Option<u32>,
    pub panel_quantity: Option<u32>,
    pub estimated_annual_production_kwh: Option<f64>,
    pub monthly_production: Option<Vec<MonthValue>>,
    pub inverter: Option<InverterDetails>,
    pub pricing: Option<Pricing>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub id: String,
    pub user_id: String,
    pub file: FileMetadata,
    pub status: DocumentStatus,
    pub data_source: Option<DataSource>,
    pub extracted: ProposalData,
    pub processing_errors: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UtilityBillData {
    pub utility_company: Option<String>,
    pub billing_period: Option<BillingPeriod>,
    pub account_number: Option<String>,
    pub total_amount: Option<f64>,
    pub energy_usage_kwh: Option<f64>,
    pub monthly_usage: Option<Vec<MonthValue>>,
    pub rate_per_kwh: Option<f64>,
    pub demand_charges: Option<f64>,
    pub taxes: Option<f64>,
    pub fees: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtilityBillRecord {
    pub id: String,
    pub user_id: String,
    pub file: FileMetadata,
    pub file_type: FileKind,
    pub status: DocumentStatus,
    pub data_source: Option<DataSource>,
    pub extracted: UtilityBillData,
    pub processing_errors: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolarSavings {
    pub monthly_savings: f64,
    pub annual_savings: f64,
    pub twenty_year_savings: f64,
    /// None when annual savings are non-positive; never infinity or NaN.
    pub payback_period_years: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyBreakdownEntry {
    pub month: String,
    pub solar_production_kwh: f64,
    pub grid_consumption_kwh: f64,
    pub utility_bill_with_solar: f64,
    pub utility_bill_without_solar: f64,
    pub savings: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentalImpact {
    pub carbon_offset_annual_tons: f64,
    pub carbon_offset_lifetime_tons: f64,
    pub trees_planted_equivalent: f64,
    pub miles_not_driven_equivalent: f64,
    pub coal_not_burned_pounds: f64,
    pub carbon_offset_factor_kg_per_mwh: f64,
    pub data_source: String,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoofSegment {
    pub pitch_degrees: f64,
    pub azimuth_degrees: f64,
    pub area_m2: f64,
    pub sunshine_quantiles: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolarPotential {
    pub segments: Vec<RoofSegment>,
    pub total_potential_kwh: f64,
    pub panel_capacity_watts: f64,
    pub carbon_offset_factor_kg_per_mwh: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolarProduction {
    pub annual_kwh: f64,
    pub monthly_kwh: Vec<MonthValue>,
    pub capacity_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncentiveProgram {
    pub name: String,
    pub kind: String,
    pub estimated_value: f64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrecIncentives {
    pub eligible: bool,
    pub rate_per_mwh: f64,
    pub estimated_annual_value: f64,
    pub program_description: String,
    pub additional_programs: Vec<IncentiveProgram>,
}

/// The six derived sub-structures of a completed analysis. A completed record
/// always has all of them populated, possibly from fallback tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisData {
    pub solar_savings: SolarSavings,
    pub monthly_breakdown: Vec<MonthlyBreakdownEntry>,
    pub environmental_impact: EnvironmentalImpact,
    pub solar_potential: SolarPotential,
    pub solar_production: SolarProduction,
    pub srec_incentives: SrecIncentives,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: String,
    pub user_id: String,
    pub proposal_id: String,
    pub utility_bill_id: String,
    pub status: ResultStatus,
    pub analysis: Option<AnalysisData>,
    pub processing_errors: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub state: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub openai_api_key: Option<String>,
    pub solar_api_key: Option<String>,
    pub pvwatts_api_key: Option<String>,
    pub ocr_language: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            openai_api_key: None,
            solar_api_key: None,
            pvwatts_api_key: None,
            ocr_language: "eng".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_kind_from_mime() {
        assert_eq!(FileKind::from_mime("application/pdf"), Some(FileKind::Pdf));
        assert_eq!(FileKind::from_mime("image/png"), Some(FileKind::Image));
        assert_eq!(FileKind::from_mime("IMAGE/JPEG"), Some(FileKind::Image));
        assert_eq!(FileKind::from_mime("text/plain"), None);
    }

    #[test]
    fn data_source_round_trips_through_strings() {
        for source in [
            DataSource::OpenAi,
            DataSource::PatternExtraction,
            DataSource::FallbackGeneration,
        ] {
            assert_eq!(DataSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(DataSource::OpenAi.as_str(), "openai");
    }

    #[test]
    fn month_series_is_january_first() {
        let series = month_series(&[1.0; 12]);
        assert_eq!(series.len(), 12);
        assert_eq!(series[0].month, "January");
        assert_eq!(series[11].month, "December");
    }
}
