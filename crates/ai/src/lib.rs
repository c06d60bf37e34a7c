//! `contractdesk-ai`
//!
//! **Responsibility:** the analysis collaborator boundary.
//!
//! - [`Analyzer`] is the seam the job orchestrator calls; [`OpenAiAnalyzer`] is the
//!   production implementation.
//! - [`ResultStreamer`] turns incremental analyzer output into typed [`StreamEvent`]s.
//!
//! Nothing here touches job state or storage.

pub mod analysis;
pub mod analyzer;
pub mod openai;
pub mod result;
pub mod stream;

pub use analysis::{
    parse_analysis_document, truncate_chars, Clause, ContractAnalysis, RiskLevel, MAX_INPUT_CHARS,
};
pub use analyzer::{AnalysisOptions, Analyzer, DeltaStream};
pub use openai::{sse_deltas, OpenAiAnalyzer};
pub use result::AiError;
pub use stream::{ResultStreamer, StreamEmitter, StreamEvent};
