//! LLM processing stack: client, extractor, cache, validator, pipeline.

pub mod cache;
pub mod client;
pub mod extractor;
pub mod models;
pub mod pipeline;
pub mod validation;

pub use cache::{CacheStats, ExtractionCache, extraction_cache_key};
pub use client::LlmClient;
pub use extractor::LlmExtractor;
pub use models::{
    ExtractionMethod, ExtractionResult, FieldOutcome, PipelineInput, PipelineMetrics,
    PipelineResult, QualityMetrics, ValidationResult,
};
pub use pipeline::ProcessingPipeline;
pub use validation::Validator;
