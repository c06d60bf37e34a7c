use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use contractdesk_ai::{Analyzer, OpenAiAnalyzer};
use contractdesk_infra::{
    cache::{CacheError, CounterStore, InMemoryCache, KeyValueCache},
    documents::{DocumentSource, GoogleDriveClient},
    store::{InMemoryJobStore, JobStore, PostgresJobStore, StoreError},
    AdmissionController, AppConfig, CacheKeys, JobOrchestrator,
};

#[cfg(feature = "redis")]
use contractdesk_infra::cache::RedisCache;

/// Where a shared dependency lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// A configured external service (Redis, Postgres).
    External,
    /// Process-local fallback used when no URL is configured.
    InMemory,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("durable store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("cache unavailable: {0}")]
    Cache(#[from] CacheError),

    #[error("REDIS_URL is set but this build has no redis support (enable the `redis` feature)")]
    RedisDisabled,
}

/// Process-wide handles, constructed once at startup and shared by every handler.
pub struct AppServices {
    pub orchestrator: JobOrchestrator,
    pub admission: AdmissionController,
    pub cache: Arc<dyn KeyValueCache>,
    pub store: Arc<dyn JobStore>,
    pub analyzer: Arc<dyn Analyzer>,
    pub cache_backend: Backend,
    pub store_backend: Backend,
    pub config: AppConfig,
}

struct CacheParts {
    values: Arc<dyn KeyValueCache>,
    counters: Arc<dyn CounterStore>,
    backend: Backend,
}

struct StoreParts {
    store: Arc<dyn JobStore>,
    backend: Backend,
}

impl AppServices {
    /// Connect to whatever `config` names: Redis and Postgres when their URLs are set,
    /// in-memory fallbacks otherwise.
    pub async fn from_config(config: AppConfig) -> Result<Self, BootstrapError> {
        let analyzer: Arc<dyn Analyzer> = Arc::new(
            OpenAiAnalyzer::new(
                config.openai_base_url.clone(),
                config.openai_model.clone(),
                config.openai_api_key.clone(),
            )
            .with_timeout(config.collaborator_timeout),
        );
        let documents: Arc<dyn DocumentSource> =
            Arc::new(GoogleDriveClient::default().with_timeout(config.collaborator_timeout));

        let cache = connect_cache(&config).await?;
        let store = connect_store(&config).await?;

        Ok(Self::assemble(config, cache, store, analyzer, documents))
    }

    /// Fully in-process wiring with caller-supplied collaborators (dev and tests).
    pub fn in_memory(
        config: AppConfig,
        analyzer: Arc<dyn Analyzer>,
        documents: Arc<dyn DocumentSource>,
    ) -> Self {
        let memory = InMemoryCache::arc();
        let cache = CacheParts {
            values: memory.clone(),
            counters: memory,
            backend: Backend::InMemory,
        };
        let store = StoreParts {
            store: InMemoryJobStore::arc(),
            backend: Backend::InMemory,
        };
        Self::assemble(config, cache, store, analyzer, documents)
    }

    fn assemble(
        config: AppConfig,
        cache: CacheParts,
        store: StoreParts,
        analyzer: Arc<dyn Analyzer>,
        documents: Arc<dyn DocumentSource>,
    ) -> Self {
        let keys = CacheKeys::new(config.key_prefix.clone());

        let orchestrator = JobOrchestrator::new(
            cache.values.clone(),
            store.store.clone(),
            analyzer.clone(),
            documents,
        )
        .with_keys(keys.clone())
        .with_settings(config.orchestrator_settings());

        let admission = AdmissionController::new(cache.counters, keys, config.admission)
            .with_timeout(config.store_timeout);

        Self {
            orchestrator,
            admission,
            cache: cache.values,
            store: store.store,
            analyzer,
            cache_backend: cache.backend,
            store_backend: store.backend,
            config,
        }
    }
}

async fn connect_cache(config: &AppConfig) -> Result<CacheParts, BootstrapError> {
    match config.redis_url.as_deref() {
        None => {
            info!("REDIS_URL not set; using in-memory cache");
            let memory = InMemoryCache::arc();
            Ok(CacheParts {
                values: memory.clone(),
                counters: memory,
                backend: Backend::InMemory,
            })
        }
        #[cfg(feature = "redis")]
        Some(url) => {
            let redis = Arc::new(RedisCache::connect(url).await?);
            info!("connected to redis");
            Ok(CacheParts {
                values: redis.clone(),
                counters: redis,
                backend: Backend::External,
            })
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => Err(BootstrapError::RedisDisabled),
    }
}

async fn connect_store(config: &AppConfig) -> Result<StoreParts, BootstrapError> {
    match config.database_url.as_deref() {
        None => {
            info!("DATABASE_URL not set; using in-memory store");
            Ok(StoreParts {
                store: InMemoryJobStore::arc(),
                backend: Backend::InMemory,
            })
        }
        Some(url) => {
            let postgres = PostgresJobStore::connect(url).await?;
            postgres.ensure_schema().await?;
            info!("connected to postgres");
            Ok(StoreParts {
                store: Arc::new(postgres),
                backend: Backend::External,
            })
        }
    }
}
