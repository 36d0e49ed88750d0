//! Document processing pipeline: uploaded file -> text -> tiered field
//! extraction (AI -> patterns -> synthesis) -> processed record with a single
//! provenance tag. A failure on one document never touches its sibling.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{
    DataSource, DocumentStatus, FileKind, FileMetadata, ProposalData, ProposalRecord, Settings,
    UploadedDocument, UtilityBillData, UtilityBillRecord,
};
use crate::services::field_extractors;
use crate::services::openai::{ExtractionAudit, OpenAiExtractor};
use crate::services::synthetic;
use crate::services::text_extraction::TextExtractor;
use crate::utils::{now_rfc3339, sha256_file};

pub async fn process_proposal(
    db: &Arc<Mutex<Database>>,
    upload: &UploadedDocument,
    user_id: &str,
    settings: &Settings,
    ai: &OpenAiExtractor,
    audit: &dyn ExtractionAudit,
) -> Result<ProposalRecord> {
    let mut record = ProposalRecord {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        file: file_metadata(upload),
        status: DocumentStatus::Pending,
        data_source: None,
        extracted: ProposalData::default(),
        processing_errors: Vec::new(),
        created_at: now_rfc3339(),
        updated_at: now_rfc3339(),
    };
    {
        let db = lock_db(db)?;
        db.insert_proposal(&record)?;
    }

    match TextExtractor::extract(upload, &settings.ocr_language) {
        Ok(text) => {
            let ai_fields = ai.extract_proposal(&text, &record.id, audit).await;
            let (extracted, source) = resolve_proposal_fields(ai_fields, &text);
            record.extracted = extracted;
            record.data_source = Some(source);
            record.status = DocumentStatus::Processed;
            info!(
                proposal_id = %record.id,
                data_source = source.as_str(),
                "proposal processed"
            );
        }
        Err(err) => {
            warn!(proposal_id = %record.id, error = %err, "proposal text extraction failed");
            record.processing_errors.push(err.to_string());
            record.status = DocumentStatus::Error;
        }
    }

    let db = lock_db(db)?;
    db.update_proposal(&record)?;
    Ok(record)
}

pub async fn process_utility_bill(
    db: &Arc<Mutex<Database>>,
    upload: &UploadedDocument,
    user_id: &str,
    settings: &Settings,
    ai: &OpenAiExtractor,
    audit: &dyn ExtractionAudit,
) -> Result<UtilityBillRecord> {
    let file_type = FileKind::from_mime(&upload.mime_type)
        .ok_or_else(|| Error::Extraction(format!("unsupported MIME type: {}", upload.mime_type)))?;

    let mut record = UtilityBillRecord {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        file: file_metadata(upload),
        file_type,
        status: DocumentStatus::Pending,
        data_source: None,
        extracted: UtilityBillData::default(),
        processing_errors: Vec::new(),
        created_at: now_rfc3339(),
        updated_at: now_rfc3339(),
    };
    {
        let db = lock_db(db)?;
        db.insert_utility_bill(&record)?;
    }

    match TextExtractor::extract(upload, &settings.ocr_language) {
        Ok(text) => {
            let ai_fields = ai.extract_utility_bill(&text, &record.id, audit).await;
            let (extracted, source) = resolve_utility_fields(ai_fields, &text);
            record.extracted = extracted;
            record.data_source = Some(source);
            record.status = DocumentStatus::Processed;
            info!(
                utility_bill_id = %record.id,
                data_source = source.as_str(),
                "utility bill processed"
            );
        }
        Err(err) => {
            warn!(utility_bill_id = %record.id, error = %err, "bill text extraction failed");
            record.processing_errors.push(err.to_string());
            record.status = DocumentStatus::Error;
        }
    }

    let db = lock_db(db)?;
    db.update_utility_bill(&record)?;
    Ok(record)
}

/// Runs the tier chain over proposal text. The provenance tag names the
/// highest tier that supplied the primary field (system size); lower tiers
/// only fill in fields the higher ones left null.
pub fn resolve_proposal_fields(
    ai: Option<ProposalData>,
    text: &str,
) -> (ProposalData, DataSource) {
    let pattern = field_extractors::extract_proposal_fields(text);

    let (merged, source) = match ai {
        Some(ai_fields) => {
            let source = if ai_fields.system_size_kw.is_some() {
                DataSource::OpenAi
            } else if pattern.system_size_kw.is_some() {
                DataSource::PatternExtraction
            } else {
                DataSource::FallbackGeneration
            };
            (merge_proposal(ai_fields, pattern), source)
        }
        None => {
            let source = if pattern.system_size_kw.is_some() {
                DataSource::PatternExtraction
            } else {
                DataSource::FallbackGeneration
            };
            (pattern, source)
        }
    };

    (synthetic::fill_missing_proposal(merged), source)
}

/// Same tier chain for bills; the primary field is the total amount.
pub fn resolve_utility_fields(
    ai: Option<UtilityBillData>,
    text: &str,
) -> (UtilityBillData, DataSource) {
    let pattern = field_extractors::extract_utility_fields(text);

    let (merged, source) = match ai {
        Some(ai_fields) => {
            let source = if ai_fields.total_amount.is_some() {
                DataSource::OpenAi
            } else if pattern.total_amount.is_some() {
                DataSource::PatternExtraction
            } else {
                DataSource::FallbackGeneration
            };
            (merge_utility(ai_fields, pattern), source)
        }
        None => {
            let source = if pattern.total_amount.is_some() {
                DataSource::PatternExtraction
            } else {
                DataSource::FallbackGeneration
            };
            (pattern, source)
        }
    };

    (synthetic::fill_missing_utility(merged), source)
}

fn merge_proposal(primary: ProposalData, secondary: ProposalData) -> ProposalData {
    ProposalData {
        system_size_kw: primary.system_size_kw.or(secondary.system_size_kw),
        panel_type: primary.panel_type.or(secondary.panel_type),
        panel_wattage: primary.panel_wattage.or(secondary.panel_wattage),
        panel_quantity: primary.panel_quantity.or(secondary.panel_quantity),
        estimated_annual_production_kwh: primary
            .estimated_annual_production_kwh
            .or(secondary.estimated_annual_production_kwh),
        monthly_production: primary.monthly_production.or(secondary.monthly_production),
        inverter: primary.inverter.or(secondary.inverter),
        pricing: match (primary.pricing, secondary.pricing) {
            (Some(a), Some(b)) => Some(crate::models::Pricing {
                total_cost: a.total_cost.or(b.total_cost),
                federal_tax_credit: a.federal_tax_credit.or(b.federal_tax_credit),
                state_rebates: a.state_rebates.or(b.state_rebates),
                other_incentives: a.other_incentives.or(b.other_incentives),
                net_cost: a.net_cost.or(b.net_cost),
            }),
            (a, b) => a.or(b),
        },
    }
}

fn merge_utility(primary: UtilityBillData, secondary: UtilityBillData) -> UtilityBillData {
    UtilityBillData {
        utility_company: primary.utility_company.or(secondary.utility_company),
        billing_period: primary.billing_period.or(secondary.billing_period),
        account_number: primary.account_number.or(secondary.account_number),
        total_amount: primary.total_amount.or(secondary.total_amount),
        energy_usage_kwh: primary.energy_usage_kwh.or(secondary.energy_usage_kwh),
        monthly_usage: primary.monthly_usage.or(secondary.monthly_usage),
        rate_per_kwh: primary.rate_per_kwh.or(secondary.rate_per_kwh),
        demand_charges: primary.demand_charges.or(secondary.demand_charges),
        taxes: primary.taxes.or(secondary.taxes),
        fees: primary.fees.or(secondary.fees),
    }
}

fn file_metadata(upload: &UploadedDocument) -> FileMetadata {
    FileMetadata {
        path: upload.path.to_string_lossy().to_string(),
        original_name: upload.original_name.clone(),
        size_bytes: upload.size_bytes,
        mime_type: upload.mime_type.clone(),
        sha256: sha256_file(&upload.path).unwrap_or_default(),
    }
}

fn lock_db<'a>(db: &'a Arc<Mutex<Database>>) -> Result<std::sync::MutexGuard<'a, Database>> {
    db.lock()
        .map_err(|_| Error::Storage("database lock poisoned".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROPOSAL_TEXT: &str =
        "System Size: 7.2 kW\nTotal System Cost: $21,600\nEstimated Annual Production: 10,400 kWh\n";

    #[test]
    fn pattern_tier_wins_when_ai_absent() {
        let (data, source) = resolve_proposal_fields(None, PROPOSAL_TEXT);
        assert_eq!(source, DataSource::PatternExtraction);
        assert_eq!(data.system_size_kw, Some(7.2));
        // Fields the patterns missed are synthesized, never left null.
        assert!(data.panel_wattage.is_some());
        assert!(data.pricing.as_ref().unwrap().net_cost.is_some());
    }

    #[test]
    fn ai_tier_wins_when_it_supplies_the_primary_field() {
        let ai = ProposalData {
            system_size_kw: Some(9.0),
            ..Default::default()
        };
        let (data, source) = resolve_proposal_fields(Some(ai), PROPOSAL_TEXT);
        assert_eq!(source, DataSource::OpenAi);
        assert_eq!(data.system_size_kw, Some(9.0));
        // Pattern results backfill what the model left null.
        assert_eq!(
            data.pricing.as_ref().unwrap().total_cost,
            Some(21600.0)
        );
    }

    #[test]
    fn empty_text_falls_all_the_way_to_synthesis() {
        let (data, source) = resolve_proposal_fields(None, "");
        assert_eq!(source, DataSource::FallbackGeneration);
        assert!(data.system_size_kw.is_some());
        assert!(data.pricing.is_some());
        assert!(data.monthly_production.is_some());

        let (bill, bill_source) = resolve_utility_fields(None, "");
        assert_eq!(bill_source, DataSource::FallbackGeneration);
        assert!(bill.total_amount.is_some());
        assert!(bill.rate_per_kwh.is_some());
        assert!(bill.account_number.is_some());
    }

    #[test]
    fn ai_without_primary_field_defers_to_patterns() {
        let ai = ProposalData {
            panel_wattage: Some(410),
            ..Default::default()
        };
        let (data, source) = resolve_proposal_fields(Some(ai), PROPOSAL_TEXT);
        assert_eq!(source, DataSource::PatternExtraction);
        assert_eq!(data.system_size_kw, Some(7.2));
        assert_eq!(data.panel_wattage, Some(410));
    }
}
