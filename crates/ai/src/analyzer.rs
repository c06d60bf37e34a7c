use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::analysis::ContractAnalysis;
use crate::result::AiError;

/// Raw text deltas that, concatenated, form one JSON analysis document.
pub type DeltaStream = BoxStream<'static, Result<String, AiError>>;

/// Auxiliary instructions passed along with the document text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisOptions {
    /// Specific questions the summary should answer.
    pub questions: Vec<String>,
}

/// The external analysis engine: text in, structured analysis out.
///
/// Implementations must tolerate (already truncated) long inputs and must report
/// failure as `Err`, never as an empty analysis.
#[async_trait]
pub trait Analyzer: Send + Sync + 'static {
    /// Short provider name for logs and health output.
    fn name(&self) -> &str;

    /// Whether credentials/endpoint are present. Used by the health probe only.
    fn is_configured(&self) -> bool {
        true
    }

    /// Blocking variant: one request, one parsed document.
    async fn analyze(
        &self,
        text: &str,
        options: &AnalysisOptions,
    ) -> Result<ContractAnalysis, AiError>;

    /// Incremental variant: deltas of the same document, in order.
    async fn analyze_incremental(
        &self,
        text: &str,
        options: &AnalysisOptions,
    ) -> Result<DeltaStream, AiError>;
}
