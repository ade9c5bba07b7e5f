//! 财务流水线：receive_document → extract_data → validate_data → store_data → generate_report

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::core::{AgentError, Payload};
use crate::integrations::AdapterRequest;
use crate::pipeline::builtin::{contains_any, push_tag, static_regex};
use crate::pipeline::{str_field, PipelineBuilder, PipelineDefinition, StepContext};

const VENDORS: &[&str] = &["Amazon", "Google", "Microsoft", "Apple", "Samsung"];
const UNKNOWN_AMOUNT: &str = "unknown";
const UNKNOWN_VENDOR: &str = "unknown vendor";
const UNKNOWN_DATE: &str = "unknown date";

static AMOUNT_RE: OnceLock<Regex> = OnceLock::new();
static DATE_RE: OnceLock<Regex> = OnceLock::new();

pub fn pipeline() -> Result<PipelineDefinition, AgentError> {
    PipelineBuilder::new("finance")
        .description("Extract, validate and store financial documents")
        .then_sync("receive_document", receive_document)
        .then_sync("extract_data", extract_data)
        .then_sync("validate_data", validate_data)
        .then("store_data", store_data)
        .then_sync("generate_report", generate_report)
        .build()
}

/// 美元金额，允许千位逗号（`$1,250.00`）
pub fn extract_amount(text: &str) -> Option<String> {
    static_regex(&AMOUNT_RE, r"\$\d{1,3}(?:,\d{3})+(?:\.\d+)?|\$\d+(?:\.\d+)?")
        .find(text)
        .map(|m| m.as_str().to_string())
}

pub fn extract_vendor(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    VENDORS.iter().copied().find(|v| lower.contains(&v.to_lowercase()))
}

/// d/m/yyyy
pub fn extract_date(text: &str) -> Option<String> {
    static_regex(&DATE_RE, r"\b\d{1,2}/\d{1,2}/\d{4}\b")
        .find(text)
        .map(|m| m.as_str().to_string())
}

fn receive_document(mut data: Payload, _: &StepContext) -> Result<Payload, AgentError> {
    data.insert("document_received".into(), Value::Bool(true));
    data.insert("document_type".into(), Value::from("financial"));
    Ok(data)
}

fn extract_data(mut data: Payload, _: &StepContext) -> Result<Payload, AgentError> {
    let task = str_field(&data, "task").to_string();
    let vendor = extract_vendor(&task);
    data.insert(
        "extracted_data".into(),
        json!({
            "amount": extract_amount(&task).unwrap_or_else(|| UNKNOWN_AMOUNT.to_string()),
            "vendor": vendor.unwrap_or(UNKNOWN_VENDOR),
            "date": extract_date(&task).unwrap_or_else(|| UNKNOWN_DATE.to_string()),
        }),
    );
    if let Some(vendor) = vendor {
        push_tag(&mut data, vendor.to_lowercase());
    }
    if contains_any(&task.to_lowercase(), &["invoice", "fatura", "nota fiscal", "bill"]) {
        push_tag(&mut data, "invoice");
    }
    Ok(data)
}

fn validate_data(mut data: Payload, _: &StepContext) -> Result<Payload, AgentError> {
    let amount = data
        .get("extracted_data")
        .and_then(|d| d.get("amount"))
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_AMOUNT);
    let is_valid = amount != UNKNOWN_AMOUNT;
    let summary = if is_valid {
        format!("Financial data valid: amount {amount}")
    } else {
        "Financial data invalid: no amount found".to_string()
    };
    data.insert("validation_result".into(), Value::from(summary));
    data.insert("is_valid".into(), Value::Bool(is_valid));
    Ok(data)
}

async fn store_data(mut data: Payload, ctx: StepContext) -> Result<Payload, AgentError> {
    let is_valid = data.get("is_valid").and_then(Value::as_bool).unwrap_or(false);
    if !is_valid {
        data.insert("stored".into(), Value::Bool(false));
        data.insert("validation_error".into(), Value::from("Invalid data, not stored"));
        return Ok(data);
    }

    let location = if ctx.adapters.is_enabled("storage") {
        let record = data.get("extracted_data").cloned().unwrap_or(Value::Null);
        let response = ctx
            .adapters
            .execute("storage", AdapterRequest::post("/financial-records", record))
            .await?;
        response
            .get("location")
            .and_then(Value::as_str)
            .unwrap_or("storage")
            .to_string()
    } else {
        "financial_database".to_string()
    };
    data.insert("stored".into(), Value::Bool(true));
    data.insert("storage_location".into(), Value::from(location));
    Ok(data)
}

fn generate_report(mut data: Payload, _: &StepContext) -> Result<Payload, AgentError> {
    let stored = data.get("stored").and_then(Value::as_bool).unwrap_or(false);
    let report = if stored {
        let vendor = data
            .get("extracted_data")
            .and_then(|d| d.get("vendor"))
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_VENDOR);
        format!("Financial report generated for {vendor}")
    } else {
        "No report generated due to validation errors".to_string()
    };
    data.insert("report".into(), Value::from(report));
    Ok(data)
}
