//! Contract-review jobs.
//!
//! ## Components
//!
//! - `Job`: the record shared by cache and durable store
//! - `JobOrchestrator`: creates jobs and drives them `queued → running → {done, error}`
//! - `StaleJobSweeper`: fails `running` jobs whose task is gone

pub mod orchestrator;
pub mod sweeper;
pub mod types;

pub use orchestrator::{JobHandle, JobOrchestrator, OrchestratorError, OrchestratorSettings};
pub use sweeper::{StaleJobSweeper, SweeperConfig, SweeperHandle};
pub use types::{
    AnalysisInput, Credential, Job, JobFailure, JobKind, JobOutcome, JobPayload, ReviewRequest,
    HISTORY_TEXT_LIMIT,
};
