//! Structured contract-analysis output.
//!
//! Field names follow the wire format clients consume (`overallRisk`, `originalText`, ...).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::result::AiError;

/// Upper bound on characters handed to the analysis provider. Longer inputs are truncated.
pub const MAX_INPUT_CHARS: usize = 50_000;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[serde(alias = "Low", alias = "LOW")]
    Low,
    #[serde(alias = "Medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "High", alias = "HIGH")]
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// One extracted clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clause {
    /// Empty when the provider omitted it; see [`ContractAnalysis::assign_missing_ids`].
    #[serde(default)]
    pub id: String,
    /// payment, ip, confidentiality, termination, liability, other
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    pub risk: RiskLevel,
    #[serde(default)]
    pub original_text: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub why_it_matters: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_edit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractAnalysis {
    pub overall_risk: RiskLevel,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub clauses: Vec<Clause>,
}

impl ContractAnalysis {
    /// Give every clause without an id a fresh one.
    pub fn assign_missing_ids(&mut self) {
        for clause in &mut self.clauses {
            if clause.id.trim().is_empty() {
                clause.id = Uuid::now_v7().to_string();
            }
        }
    }
}

/// Parse one complete analysis document as produced by the provider.
///
/// Accepts optional markdown code-fence wrapping (```json ... ```).
pub fn parse_analysis_document(raw: &str) -> Result<ContractAnalysis, AiError> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(AiError::EmptyResponse);
    }

    let mut analysis: ContractAnalysis =
        serde_json::from_str(body).map_err(|e| AiError::MalformedOutput(e.to_string()))?;
    analysis.assign_missing_ids();
    Ok(analysis)
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the info string (e.g. `json`) on the opening fence line.
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

/// Truncate `text` to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
