//! Structured-extraction adapter over the OpenAI chat completions API.
//!
//! Every method returns `None` when the adapter is unconfigured, the call
//! fails, or the reply does not validate against the expected schema; callers
//! fall through to the next extraction tier. Every attempt is recorded
//! through the injected [`ExtractionAudit`] collaborator.

use anyhow::{anyhow, Result};
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::db::Database;
use crate::models::{EnvironmentalImpact, ProposalData, UtilityBillData};

/// Empirical bound on prompt text; proposals and bills carry their fields
/// well inside this window and longer prompts only add cost and latency.
const MAX_INPUT_CHARS: usize = 12_000;
const AUDIT_SAMPLE_CHARS: usize = 400;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MODEL: &str = "gpt-4o-mini";

/// Outcome of one extraction attempt, as written to the audit trail.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub correlation_id: String,
    pub document_id: Option<String>,
    pub provider: &'static str,
    pub status: &'static str,
    pub input_sample: String,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub message: Option<String>,
}

/// Injected audit collaborator. Recording must never fail the primary call;
/// implementations swallow their own errors.
pub trait ExtractionAudit: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// Database-backed audit trail over the `extraction_logs` table.
pub struct DbExtractionAudit {
    db: Arc<Mutex<Database>>,
}

impl DbExtractionAudit {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        DbExtractionAudit { db }
    }
}

impl ExtractionAudit for DbExtractionAudit {
    fn record(&self, entry: AuditEntry) {
        let Ok(db) = self.db.lock() else {
            warn!("audit lock poisoned; extraction log entry dropped");
            return;
        };
        if let Err(err) = db.log_extraction(
            &entry.correlation_id,
            entry.document_id.as_deref(),
            entry.provider,
            entry.status,
            Some(&entry.input_sample),
            entry.prompt_tokens,
            entry.completion_tokens,
            entry.message.as_deref(),
        ) {
            warn!(error = %err, "failed to persist extraction log entry");
        }
    }
}

/// In-memory double for tests.
#[derive(Default)]
pub struct MemoryExtractionAudit {
    pub entries: Mutex<Vec<AuditEntry>>,
}

impl ExtractionAudit for MemoryExtractionAudit {
    fn record(&self, entry: AuditEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<Message>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: i64,
    completion_tokens: i64,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

pub struct OpenAiExtractor {
    api_key: Option<String>,
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiExtractor {
    pub fn new(api_key: Option<String>) -> Self {
        OpenAiExtractor {
            api_key,
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: "https://api.openai.com".to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    #[cfg(test)]
    pub fn with_base_url(api_key: Option<String>, base_url: &str) -> Self {
        let mut adapter = Self::new(api_key);
        adapter.base_url = base_url.trim_end_matches('/').to_string();
        adapter
    }

    pub async fn extract_proposal(
        &self,
        text: &str,
        document_id: &str,
        audit: &dyn ExtractionAudit,
    ) -> Option<ProposalData> {
        match self
            .extract_structured(
                text,
                Some(document_id),
                "proposal-extraction",
                &proposal_schema(),
                &proposal_prompt(),
            )
            .await
        {
            Ok((value, entry)) => {
                audit.record(entry);
                Some(map_proposal(&value))
            }
            Err(err) => {
                self.audit_failure(audit, Some(document_id), "proposal-extraction", text, err);
                None
            }
        }
    }

    pub async fn extract_utility_bill(
        &self,
        text: &str,
        document_id: &str,
        audit: &dyn ExtractionAudit,
    ) -> Option<UtilityBillData> {
        match self
            .extract_structured(
                text,
                Some(document_id),
                "utility-extraction",
                &utility_schema(),
                &utility_prompt(),
            )
            .await
        {
            Ok((value, entry)) => {
                audit.record(entry);
                Some(map_utility(&value))
            }
            Err(err) => {
                self.audit_failure(audit, Some(document_id), "utility-extraction", text, err);
                None
            }
        }
    }

    /// Asks the model for region-aware environmental impact figures. `None`
    /// sends the engine to the carbon-factor calculation instead.
    pub async fn estimate_environmental_impact(
        &self,
        system_size_kw: f64,
        annual_production_kwh: f64,
        state: Option<&str>,
        audit: &dyn ExtractionAudit,
    ) -> Option<EnvironmentalImpact> {
        let context = format!(
            "System size: {system_size_kw:.1} kW\nAnnual production: {annual_production_kwh:.0} kWh\nState: {}",
            state.unwrap_or("unknown")
        );
        match self
            .extract_structured(
                &context,
                None,
                "environmental-impact",
                &impact_schema(),
                &impact_prompt(),
            )
            .await
        {
            Ok((value, entry)) => {
                audit.record(entry);
                Some(map_impact(&value, annual_production_kwh))
            }
            Err(err) => {
                self.audit_failure(audit, None, "environmental-impact", &context, err);
                None
            }
        }
    }

    /// Shared call path: bounded input, one call, schema validation with a
    /// single fix-it retry. Returns the validated JSON value and the success
    /// audit entry for the caller to record.
    async fn extract_structured(
        &self,
        text: &str,
        document_id: Option<&str>,
        provider: &'static str,
        schema: &JSONSchema,
        system_prompt: &str,
    ) -> Result<(Value, AuditEntry)> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("adapter not configured"))?;

        let bounded: String = text.chars().take(MAX_INPUT_CHARS).collect();
        let correlation_id = uuid::Uuid::new_v4().to_string();
        debug!(%correlation_id, provider, chars = bounded.len(), "ai extraction attempt");

        let (mut raw, mut usage) = self
            .call_chat(api_key, system_prompt, &format!("Document text:\n{bounded}"))
            .await?;
        let mut value = parse_json(&raw)?;

        if !schema.is_valid(&value) {
            let fix_prompt = format!(
                "Fix this JSON so it matches the schema exactly. Output JSON only. JSON:\n{raw}"
            );
            let (fixed_raw, fixed_usage) = self.call_chat(api_key, system_prompt, &fix_prompt).await?;
            raw = fixed_raw;
            usage = fixed_usage;
            value = parse_json(&raw)?;
            if !schema.is_valid(&value) {
                return Err(anyhow!("response failed schema validation"));
            }
        }

        let entry = AuditEntry {
            correlation_id,
            document_id: document_id.map(|s| s.to_string()),
            provider,
            status: "success",
            input_sample: sample(&bounded),
            prompt_tokens: usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: usage.as_ref().map(|u| u.completion_tokens),
            message: None,
        };
        Ok((value, entry))
    }

    fn audit_failure(
        &self,
        audit: &dyn ExtractionAudit,
        document_id: Option<&str>,
        provider: &'static str,
        text: &str,
        err: anyhow::Error,
    ) {
        let status = if self.api_key.is_none() {
            "not-configured"
        } else if err.to_string().contains("schema") || err.to_string().contains("JSON") {
            "parse-error"
        } else {
            "api-error"
        };
        warn!(provider, status, error = %err, "ai extraction fell through");
        audit.record(AuditEntry {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.map(|s| s.to_string()),
            provider,
            status,
            input_sample: sample(text),
            prompt_tokens: None,
            completion_tokens: None,
            message: Some(err.to_string()),
        });
    }

    async fn call_chat(
        &self,
        api_key: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<(String, Option<Usage>)> {
        let request = ChatRequest {
            model: MODEL.to_string(),
            temperature: 0.1,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_object".to_string(),
            },
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("api error {status}: {body}"));
        }

        let body: ChatResponse = response.json().await?;
        let usage = body.usage;
        let content = body
            .choices
            .first()
            .ok_or_else(|| anyhow!("empty response"))?
            .message
            .content
            .trim()
            .to_string();
        Ok((content, usage))
    }
}

fn sample(text: &str) -> String {
    text.chars().take(AUDIT_SAMPLE_CHARS).collect()
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str::<Value>(raw).map_err(|e| anyhow!("invalid JSON: {e}"))
}

fn opt_f64(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(Value::as_f64)
}

fn opt_u32(value: &Value, key: &str) -> Option<u32> {
    value.get(key).and_then(Value::as_u64).map(|v| v as u32)
}

fn opt_string(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

fn map_proposal(value: &Value) -> ProposalData {
    let pricing = crate::models::Pricing {
        total_cost: opt_f64(value, "total_cost"),
        federal_tax_credit: opt_f64(value, "federal_tax_credit"),
        state_rebates: opt_f64(value, "state_rebates"),
        other_incentives: opt_f64(value, "other_incentives"),
        net_cost: opt_f64(value, "net_cost"),
    };
    let has_pricing = pricing.total_cost.is_some() || pricing.net_cost.is_some();

    ProposalData {
        system_size_kw: opt_f64(value, "system_size_kw"),
        panel_type: opt_string(value, "panel_type"),
        panel_wattage: opt_u32(value, "panel_wattage"),
        panel_quantity: opt_u32(value, "panel_quantity"),
        estimated_annual_production_kwh: opt_f64(value, "estimated_annual_production_kwh"),
        monthly_production: None,
        inverter: opt_string(value, "inverter_type").map(|kind| crate::models::InverterDetails {
            kind: Some(kind),
            model: opt_string(value, "inverter_model"),
            quantity: opt_u32(value, "inverter_quantity"),
        }),
        pricing: has_pricing.then_some(pricing),
    }
}

fn map_utility(value: &Value) -> UtilityBillData {
    let billing_period = match (
        opt_string(value, "billing_start_date"),
        opt_string(value, "billing_end_date"),
    ) {
        (Some(start), Some(end)) => match (
            crate::utils::parse_bill_date(&start),
            crate::utils::parse_bill_date(&end),
        ) {
            (Some(start_date), Some(end_date)) => Some(crate::models::BillingPeriod {
                start_date,
                end_date,
            }),
            _ => None,
        },
        _ => None,
    };

    UtilityBillData {
        utility_company: opt_string(value, "utility_company"),
        billing_period,
        account_number: opt_string(value, "account_number"),
        total_amount: opt_f64(value, "total_amount"),
        energy_usage_kwh: opt_f64(value, "energy_usage_kwh"),
        monthly_usage: None,
        rate_per_kwh: opt_f64(value, "rate_per_kwh"),
        demand_charges: opt_f64(value, "demand_charges"),
        taxes: opt_f64(value, "taxes"),
        fees: opt_f64(value, "fees"),
    }
}

fn map_impact(value: &Value, annual_production_kwh: f64) -> EnvironmentalImpact {
    let factor = opt_f64(value, "carbon_offset_factor_kg_per_mwh")
        .unwrap_or(crate::services::analysis::DEFAULT_CARBON_FACTOR_KG_PER_MWH);
    let annual_tons = opt_f64(value, "carbon_offset_annual_tons")
        .unwrap_or((annual_production_kwh / 1000.0) * (factor / 1000.0));
    EnvironmentalImpact {
        carbon_offset_annual_tons: annual_tons,
        carbon_offset_lifetime_tons: annual_tons * crate::services::analysis::PANEL_LIFETIME_YEARS,
        trees_planted_equivalent: annual_tons * crate::services::analysis::TREES_PER_TON,
        miles_not_driven_equivalent: annual_tons * crate::services::analysis::MILES_PER_TON,
        coal_not_burned_pounds: annual_production_kwh
            * crate::services::analysis::COAL_POUNDS_PER_KWH,
        carbon_offset_factor_kg_per_mwh: factor,
        data_source: "openai".to_string(),
        explanation: opt_string(value, "explanation")
            .unwrap_or_else(|| "Model-estimated regional grid emissions profile".to_string()),
    }
}

fn compile_schema(schema: Value) -> JSONSchema {
    JSONSchema::compile(&schema).expect("invalid extraction schema")
}

fn proposal_schema() -> JSONSchema {
    compile_schema(json!({
        "type": "object",
        "required": ["system_size_kw"],
        "properties": {
            "system_size_kw": {"type": ["number", "null"]},
            "panel_type": {"type": ["string", "null"]},
            "panel_wattage": {"type": ["integer", "null"]},
            "panel_quantity": {"type": ["integer", "null"]},
            "estimated_annual_production_kwh": {"type": ["number", "null"]},
            "inverter_type": {"type": ["string", "null"]},
            "inverter_model": {"type": ["string", "null"]},
            "inverter_quantity": {"type": ["integer", "null"]},
            "total_cost": {"type": ["number", "null"]},
            "federal_tax_credit": {"type": ["number", "null"]},
            "state_rebates": {"type": ["number", "null"]},
            "other_incentives": {"type": ["number", "null"]},
            "net_cost": {"type": ["number", "null"]}
        }
    }))
}

fn utility_schema() -> JSONSchema {
    compile_schema(json!({
        "type": "object",
        "required": ["total_amount", "energy_usage_kwh"],
        "properties": {
            "utility_company": {"type": ["string", "null"]},
            "billing_start_date": {"type": ["string", "null"]},
            "billing_end_date": {"type": ["string", "null"]},
            "account_number": {"type": ["string", "null"]},
            "total_amount": {"type": ["number", "null"]},
            "energy_usage_kwh": {"type": ["number", "null"]},
            "rate_per_kwh": {"type": ["number", "null"]},
            "demand_charges": {"type": ["number", "null"]},
            "taxes": {"type": ["number", "null"]},
            "fees": {"type": ["number", "null"]}
        }
    }))
}

fn impact_schema() -> JSONSchema {
    compile_schema(json!({
        "type": "object",
        "required": ["carbon_offset_annual_tons"],
        "properties": {
            "carbon_offset_annual_tons": {"type": ["number", "null"]},
            "carbon_offset_factor_kg_per_mwh": {"type": ["number", "null"]},
            "explanation": {"type": ["string", "null"]}
        }
    }))
}

fn proposal_prompt() -> String {
    "You are a solar proposal extraction system. Return JSON only, matching the schema exactly. \
     Use null for any field not present in the document. Fields: system_size_kw (number|null), \
     panel_type (string|null), panel_wattage (integer|null), panel_quantity (integer|null), \
     estimated_annual_production_kwh (number|null), inverter_type (string|null), \
     inverter_model (string|null), inverter_quantity (integer|null), total_cost (number|null), \
     federal_tax_credit (number|null), state_rebates (number|null), other_incentives (number|null), \
     net_cost (number|null)."
        .to_string()
}

fn utility_prompt() -> String {
    "You are a utility bill extraction system. Return JSON only, matching the schema exactly. \
     Use null for any field not present in the document. Fields: utility_company (string|null), \
     billing_start_date (MM/DD/YYYY|null), billing_end_date (MM/DD/YYYY|null), \
     account_number (string|null), total_amount (number|null), energy_usage_kwh (number|null), \
     rate_per_kwh (number|null), demand_charges (number|null), taxes (number|null), fees (number|null)."
        .to_string()
}

fn impact_prompt() -> String {
    "You estimate the environmental impact of residential solar. Return JSON only, matching the \
     schema exactly, using the regional grid mix for the given state. Fields: \
     carbon_offset_annual_tons (number|null), carbon_offset_factor_kg_per_mwh (number|null), \
     explanation (string|null)."
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_adapter_returns_none_and_audits() {
        let adapter = OpenAiExtractor::new(None);
        let audit = MemoryExtractionAudit::default();
        let result = adapter.extract_proposal("some text", "doc-1", &audit).await;
        assert!(result.is_none());

        let entries = audit.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, "not-configured");
        assert_eq!(entries[0].document_id.as_deref(), Some("doc-1"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_returns_none_with_api_error() {
        // Connection refused locally; no network involved.
        let adapter =
            OpenAiExtractor::with_base_url(Some("sk-test".to_string()), "http://127.0.0.1:9");
        let audit = MemoryExtractionAudit::default();
        let result = adapter
            .extract_utility_bill("bill text", "doc-2", &audit)
            .await;
        assert!(result.is_none());

        let entries = audit.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, "api-error");
    }

    #[test]
    fn proposal_mapping_reads_nested_pricing() {
        let value = json!({
            "system_size_kw": 9.6,
            "panel_wattage": 400,
            "panel_quantity": 24,
            "total_cost": 28800.0,
            "net_cost": 20160.0,
            "inverter_type": "string inverter"
        });
        let data = map_proposal(&value);
        assert_eq!(data.system_size_kw, Some(9.6));
        assert_eq!(data.panel_quantity, Some(24));
        let pricing = data.pricing.expect("pricing");
        assert_eq!(pricing.net_cost, Some(20160.0));
        assert_eq!(
            data.inverter.unwrap().kind.as_deref(),
            Some("string inverter")
        );
    }

    #[test]
    fn impact_mapping_backfills_derived_figures() {
        let value = json!({
            "carbon_offset_annual_tons": null,
            "carbon_offset_factor_kg_per_mwh": 700.0,
            "explanation": "regional mix"
        });
        let impact = map_impact(&value, 14000.0);
        assert!((impact.carbon_offset_annual_tons - 9.8).abs() < 1e-9);
        assert_eq!(impact.carbon_offset_factor_kg_per_mwh, 700.0);
        assert_eq!(impact.data_source, "openai");
    }
}
