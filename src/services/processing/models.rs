//! Processing data models.
//!
//! Wire types for the OpenAI-compatible chat endpoint, extraction results,
//! pipeline results, and the metrics snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::models::Property;
use crate::utils::ErrorKind;

// ============================================================================
// Chat completion wire types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    pub r#type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponseMessage {
    pub content: Option<String>,
}

// ============================================================================
// Extraction
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Llm,
    Fallback,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Fallback => "fallback",
        }
    }
}

/// Structured fields pulled out of unstructured listing text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Flat field object (street, price, bedrooms, ...)
    pub fields: Value,
    pub method: ExtractionMethod,
    /// Fallback results never exceed 0.5
    pub confidence: f64,
    pub source_tag: String,
}

// ============================================================================
// Validation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOutcome {
    Valid,
    Invalid,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QualityMetrics {
    /// Fraction of the critical field set present
    pub completeness: f64,
    /// Fraction of cross-field checks that passed
    pub consistency: f64,
    /// Source-reported quality rolled up
    pub accuracy: f64,
    /// Freshness of the latest observation
    pub timeliness: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub confidence_score: f64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub field_validations: BTreeMap<String, FieldOutcome>,
    pub quality_metrics: QualityMetrics,
}

// ============================================================================
// Pipeline
// ============================================================================

/// One unit of work for the pipeline.
#[derive(Debug, Clone)]
pub enum PipelineInput {
    /// Rendered listing HTML (goes through extraction)
    Html(String),
    /// Structured source record (goes straight to the adapter)
    Json(Value),
}

/// Outcome for one input; a batch of N inputs always yields N of these,
/// in input order.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub is_valid: bool,
    pub property: Option<Property>,
    pub validation: Option<ValidationResult>,
    pub extraction_method: Option<ExtractionMethod>,
    /// Sanitized message for failed items
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub processing_time_ms: u64,
}

impl PipelineResult {
    pub fn failed(kind: ErrorKind, error: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            is_valid: false,
            property: None,
            validation: None,
            extraction_method: None,
            error: Some(error.into()),
            error_kind: Some(kind),
            processing_time_ms: elapsed_ms,
        }
    }
}

/// Read-only snapshot computed on request.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineMetrics {
    pub total_processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub average_processing_time_ms: f64,
    pub average_confidence: f64,
}
