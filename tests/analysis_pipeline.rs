//! End-to-end pipeline tests against a temp database with all adapters in
//! offline mode. No network is involved: "live" clients point at an
//! unroutable local port when a masked failure is being simulated.

use std::sync::{Arc, Mutex};

use solsight::db::Database;
use solsight::models::{
    DataSource, DocumentStatus, FileMetadata, ProposalData, ProposalRecord, ResultStatus,
    Settings, UserProfile, UtilityBillData, UtilityBillRecord,
};
use solsight::services::analysis::AnalysisEngine;
use solsight::services::incentives::IncentiveClient;
use solsight::services::openai::{MemoryExtractionAudit, OpenAiExtractor};
use solsight::services::production_sim::ProductionSimClient;
use solsight::services::roof_potential::RoofPotentialClient;
use solsight::utils::now_rfc3339;
use solsight::Error;

fn temp_db() -> Arc<Mutex<Database>> {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("solsight-test.sqlite");
    // Leak the tempdir so the file outlives the handle for the test duration.
    std::mem::forget(dir);
    Arc::new(Mutex::new(Database::new(path).expect("open database")))
}

fn seed_user(db: &Arc<Mutex<Database>>, id: &str, state: Option<&str>) {
    let profile = UserProfile {
        id: id.to_string(),
        state: state.map(|s| s.to_string()),
        latitude: state.map(|_| 40.22),
        longitude: state.map(|_| -74.75),
    };
    db.lock().unwrap().upsert_user(&profile).unwrap();
}

fn file_meta(name: &str) -> FileMetadata {
    FileMetadata {
        path: format!("/tmp/{name}"),
        original_name: name.to_string(),
        size_bytes: 4096,
        mime_type: "application/pdf".to_string(),
        sha256: "deadbeef".to_string(),
    }
}

fn seed_proposal(db: &Arc<Mutex<Database>>, id: &str, user_id: &str, data: ProposalData) {
    let record = ProposalRecord {
        id: id.to_string(),
        user_id: user_id.to_string(),
        file: file_meta("proposal.pdf"),
        status: DocumentStatus::Processed,
        data_source: Some(DataSource::PatternExtraction),
        extracted: data,
        processing_errors: vec![],
        created_at: now_rfc3339(),
        updated_at: now_rfc3339(),
    };
    db.lock().unwrap().insert_proposal(&record).unwrap();
}

fn seed_bill(db: &Arc<Mutex<Database>>, id: &str, user_id: &str, data: UtilityBillData) {
    let record = UtilityBillRecord {
        id: id.to_string(),
        user_id: user_id.to_string(),
        file: file_meta("bill.pdf"),
        file_type: solsight::models::FileKind::Pdf,
        status: DocumentStatus::Processed,
        data_source: Some(DataSource::PatternExtraction),
        extracted: data,
        processing_errors: vec![],
        created_at: now_rfc3339(),
        updated_at: now_rfc3339(),
    };
    db.lock().unwrap().insert_utility_bill(&record).unwrap();
}

fn offline_engine(db: Arc<Mutex<Database>>) -> AnalysisEngine {
    AnalysisEngine::new(db, &Settings::default())
}

fn sample_proposal_data() -> ProposalData {
    ProposalData {
        system_size_kw: Some(10.0),
        estimated_annual_production_kwh: Some(14000.0),
        ..Default::default()
    }
}

fn sample_bill_data() -> UtilityBillData {
    UtilityBillData {
        energy_usage_kwh: Some(1000.0),
        rate_per_kwh: Some(0.15),
        ..Default::default()
    }
}

#[tokio::test]
async fn generate_completes_with_all_substructures() {
    let db = temp_db();
    seed_user(&db, "user-1", Some("NJ"));
    seed_proposal(&db, "p-1", "user-1", sample_proposal_data());
    seed_bill(&db, "b-1", "user-1", sample_bill_data());

    let engine = offline_engine(db);
    let record = engine.generate("p-1", "b-1", "user-1", None).await.unwrap();

    assert_eq!(record.status, ResultStatus::Completed);
    assert!(record.processing_errors.is_empty());

    let analysis = record.analysis.expect("completed record has analysis");
    assert_eq!(analysis.monthly_breakdown.len(), 12);
    assert!(!analysis.solar_potential.segments.is_empty());
    assert!(analysis.solar_production.annual_kwh > 0.0);
    assert_eq!(analysis.solar_production.monthly_kwh.len(), 12);
    assert!(analysis.environmental_impact.carbon_offset_annual_tons > 0.0);
    assert!(!analysis.environmental_impact.explanation.is_empty());
    // NJ runs an SREC market.
    assert!(analysis.srec_incentives.eligible);
    assert!(analysis.srec_incentives.rate_per_mwh > 0.0);
    assert!(analysis.solar_savings.annual_savings > 0.0);
    assert!(analysis.solar_savings.payback_period_years.is_some());
}

#[tokio::test]
async fn generate_succeeds_with_entirely_empty_extractions() {
    // The completeness invariant: however sparse the inputs, the result is
    // completed and fully populated.
    let db = temp_db();
    seed_user(&db, "user-1", None);
    seed_proposal(&db, "p-1", "user-1", ProposalData::default());
    seed_bill(&db, "b-1", "user-1", UtilityBillData::default());

    let engine = offline_engine(db);
    let record = engine.generate("p-1", "b-1", "user-1", None).await.unwrap();

    assert_eq!(record.status, ResultStatus::Completed);
    let analysis = record.analysis.unwrap();
    // Defaults: 10 kW at the offline yield average.
    assert_eq!(analysis.solar_production.annual_kwh, 14000.0);
    assert_eq!(analysis.monthly_breakdown.len(), 12);
    assert!(analysis
        .monthly_breakdown
        .iter()
        .all(|e| e.grid_consumption_kwh >= 0.0));
}

#[tokio::test]
async fn annual_savings_match_monthly_sum() {
    let db = temp_db();
    seed_user(&db, "user-1", Some("MA"));
    seed_proposal(&db, "p-1", "user-1", sample_proposal_data());
    seed_bill(&db, "b-1", "user-1", sample_bill_data());

    let engine = offline_engine(db);
    let record = engine.generate("p-1", "b-1", "user-1", None).await.unwrap();
    let analysis = record.analysis.unwrap();

    let summed: f64 = analysis
        .monthly_breakdown
        .iter()
        .map(|e| e.savings)
        .sum();
    assert!((analysis.solar_savings.annual_savings - summed).abs() < 0.01);
    assert!(
        analysis.solar_savings.twenty_year_savings
            > analysis.solar_savings.annual_savings * 20.0
    );
}

#[tokio::test]
async fn masked_adapter_failures_still_complete() {
    // Every "live" adapter points at a refused local port; each failure is
    // masked by its offline generator and generation still completes.
    let db = temp_db();
    seed_user(&db, "user-1", Some("TX"));
    seed_proposal(&db, "p-1", "user-1", sample_proposal_data());
    seed_bill(&db, "b-1", "user-1", sample_bill_data());

    let engine = AnalysisEngine::with_components(
        db,
        OpenAiExtractor::new(None),
        RoofPotentialClient::with_base_url(Some("key".to_string()), "http://127.0.0.1:9"),
        ProductionSimClient::with_base_url(Some("key".to_string()), "http://127.0.0.1:9"),
        IncentiveClient::new(Some("http://127.0.0.1:9".to_string())),
        Arc::new(MemoryExtractionAudit::default()),
    );

    let record = engine.generate("p-1", "b-1", "user-1", None).await.unwrap();
    assert_eq!(record.status, ResultStatus::Completed);

    let analysis = record.analysis.unwrap();
    assert_eq!(analysis.solar_potential.segments.len(), 2);
    assert!(analysis.solar_production.annual_kwh > 0.0);
    // TX has no SREC market, and the explanation says so.
    assert!(!analysis.srec_incentives.eligible);
    assert_eq!(analysis.srec_incentives.rate_per_mwh, 0.0);
    assert_eq!(analysis.srec_incentives.estimated_annual_value, 0.0);
    assert!(!analysis.srec_incentives.program_description.is_empty());
}

#[tokio::test]
async fn missing_records_fail_fast_without_placeholder() {
    let db = temp_db();
    seed_user(&db, "user-1", None);
    seed_bill(&db, "b-1", "user-1", sample_bill_data());

    let engine = offline_engine(db.clone());
    let err = engine
        .generate("missing-proposal", "b-1", "user-1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { resource: "proposal", .. }));
    assert!(db
        .lock()
        .unwrap()
        .list_results_for_user("user-1")
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn someone_elses_records_read_as_not_found() {
    let db = temp_db();
    seed_user(&db, "owner", None);
    seed_user(&db, "intruder", None);
    seed_proposal(&db, "p-1", "owner", sample_proposal_data());
    seed_bill(&db, "b-1", "owner", sample_bill_data());

    let engine = offline_engine(db);
    let err = engine
        .generate("p-1", "b-1", "intruder", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn regeneration_creates_a_new_record() {
    let db = temp_db();
    seed_user(&db, "user-1", None);
    seed_proposal(&db, "p-1", "user-1", sample_proposal_data());
    seed_bill(&db, "b-1", "user-1", sample_bill_data());

    let engine = offline_engine(db.clone());
    let first = engine.generate("p-1", "b-1", "user-1", None).await.unwrap();
    let second = engine.generate("p-1", "b-1", "user-1", None).await.unwrap();

    assert_ne!(first.id, second.id);
    let ids = db.lock().unwrap().list_results_for_user("user-1").unwrap();
    assert_eq!(ids.len(), 2);
}

#[tokio::test]
async fn result_deletion_is_ownership_gated() {
    let db = temp_db();
    seed_user(&db, "owner", None);
    seed_proposal(&db, "p-1", "owner", sample_proposal_data());
    seed_bill(&db, "b-1", "owner", sample_bill_data());

    let engine = offline_engine(db);
    let record = engine.generate("p-1", "b-1", "owner", None).await.unwrap();

    let denied = engine.delete_result(&record.id, "intruder", false);
    assert!(matches!(denied, Err(Error::Forbidden)));

    // An administrative capability overrides ownership.
    engine.delete_result(&record.id, "intruder", true).unwrap();
    let gone = engine.get_result(&record.id, "owner");
    assert!(matches!(gone, Err(Error::NotFound { .. })));
}

#[tokio::test]
async fn deleting_sources_keeps_result_references() {
    let db = temp_db();
    seed_user(&db, "user-1", None);
    seed_proposal(&db, "p-1", "user-1", sample_proposal_data());
    seed_bill(&db, "b-1", "user-1", sample_bill_data());

    let engine = offline_engine(db);
    let record = engine.generate("p-1", "b-1", "user-1", None).await.unwrap();

    engine.delete_proposal("p-1", "user-1", false).unwrap();
    engine.delete_utility_bill("b-1", "user-1", false).unwrap();

    // The result survives as a historical pointer.
    let loaded = engine.get_result(&record.id, "user-1").unwrap();
    assert_eq!(loaded.proposal_id, "p-1");
    assert_eq!(loaded.utility_bill_id, "b-1");
    assert_eq!(loaded.status, ResultStatus::Completed);
}

#[tokio::test]
async fn worked_scenario_numbers() {
    // 10 kW, 1000 kWh/month, $0.15/kWh, 14,000 kWh/year production.
    let db = temp_db();
    seed_user(&db, "user-1", None);
    seed_proposal(&db, "p-1", "user-1", sample_proposal_data());
    seed_bill(&db, "b-1", "user-1", sample_bill_data());

    let engine = offline_engine(db);
    let record = engine.generate("p-1", "b-1", "user-1", None).await.unwrap();
    let analysis = record.analysis.unwrap();

    // Production distributes seasonally, so months differ, but the annual
    // bill without solar is fixed: 12 x 1000 kWh x $0.15.
    let without: f64 = analysis
        .monthly_breakdown
        .iter()
        .map(|e| e.utility_bill_without_solar)
        .sum();
    assert!((without - 1800.0).abs() < 0.01);
    assert!(analysis.solar_savings.annual_savings <= 1800.0 + 0.01);
    assert!(analysis.solar_savings.annual_savings > 0.0);
}
