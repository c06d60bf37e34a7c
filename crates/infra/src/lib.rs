//! Infrastructure layer: job orchestration, Redis cache, Postgres store, config, external services.

pub mod admission;
pub mod cache;
pub mod config;
pub mod documents;
pub mod jobs;
pub mod persist;
pub mod store;


pub use admission::{AdmissionController, AdmissionPolicy, Decision};
pub use cache::{CacheError, CacheKeys, CounterStore, InMemoryCache, KeyValueCache};
pub use config::{AppConfig, ConfigError};
pub use jobs::{
    AnalysisInput, Credential, Job, JobHandle, JobOrchestrator, JobOutcome, OrchestratorError,
    OrchestratorSettings, StaleJobSweeper, SweeperConfig, SweeperHandle,
};
pub use store::{InMemoryJobStore, JobStore, Message, MessageRole, PostgresJobStore, StoreError};

#[cfg(feature = "redis")]
pub use cache::RedisCache;
