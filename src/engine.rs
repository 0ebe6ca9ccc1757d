//! The assembled chain engine.
//!
//! [`ChainEngine`] wires a store, the state manager, an executor, the resume
//! coordinator and the submitter together. The CLI opens one from a
//! [`Config`]; tests and embedders use [`ChainEngine::builder`] to swap in
//! their own store, task executor or event sink.

use crate::chain::{
    ChainBackend, ChainExecutor, ChainStateManager, ChainSubmitter, ResumeCoordinator,
    ResumeHandle, ResumeOptions, SubmittedChain, purge_abandoned_chains,
};
use crate::config::Config;
use crate::errors::EngineError;
use crate::events::{EventSink, NullEventSink};
use crate::init::EngineLock;
use crate::store::{JsonFileStore, StateStore};
use crate::workers::{CommandWorker, TaskExecutor, WorkerRegistry};
use std::sync::Arc;
use stepchain_common::model::now_millis;
use stepchain_common::{ChainDefinition, ChainError, ChainRecord};
use tracing::info;

/// Counts from an explicit cleanup pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    pub expired_removed: usize,
    pub abandoned_removed: Vec<String>,
}

pub struct ChainEngineBuilder {
    store: Arc<dyn StateStore>,
    tasks: Option<Arc<dyn TaskExecutor>>,
    events: Arc<dyn EventSink>,
    options: ResumeOptions,
    resume_on_start: bool,
    backend: ChainBackend,
    lock: Option<EngineLock>,
}

impl ChainEngineBuilder {
    /// Defaults to the built-in worker registry.
    pub fn tasks(mut self, tasks: Arc<dyn TaskExecutor>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn resume_options(mut self, options: ResumeOptions) -> Self {
        self.options = options;
        self
    }

    /// Whether [`ChainEngine::start`] resumes interrupted chains.
    pub fn resume_on_start(mut self, enabled: bool) -> Self {
        self.resume_on_start = enabled;
        self
    }

    pub fn backend(mut self, backend: ChainBackend) -> Self {
        self.backend = backend;
        self
    }

    fn lock(mut self, lock: EngineLock) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn build(self) -> ChainEngine {
        let manager = Arc::new(ChainStateManager::new(self.store));
        let tasks = self
            .tasks
            .unwrap_or_else(|| Arc::new(WorkerRegistry::with_builtins()));
        let executor = ChainExecutor::new(Arc::clone(&manager), tasks, Arc::clone(&self.events));
        let resume = ResumeCoordinator::new(
            executor.clone(),
            Arc::clone(&self.events),
            self.options.clone(),
        )
        .with_backend(self.backend);

        ChainEngine {
            submitter: ChainSubmitter::new(executor),
            resume,
            manager,
            events: self.events,
            options: self.options,
            resume_on_start: self.resume_on_start,
            _lock: self.lock,
        }
    }
}

pub struct ChainEngine {
    manager: Arc<ChainStateManager>,
    submitter: ChainSubmitter,
    resume: ResumeCoordinator,
    events: Arc<dyn EventSink>,
    options: ResumeOptions,
    resume_on_start: bool,
    _lock: Option<EngineLock>,
}

impl ChainEngine {
    pub fn builder(store: Arc<dyn StateStore>) -> ChainEngineBuilder {
        ChainEngineBuilder {
            store,
            tasks: None,
            events: Arc::new(NullEventSink),
            options: ResumeOptions::default(),
            resume_on_start: true,
            backend: ChainBackend::Simulated,
            lock: None,
        }
    }

    /// Open the engine for a project: take the process lock, use the
    /// configured JSON state file and register workers per config.
    pub fn open(config: &Config, events: Arc<dyn EventSink>) -> Result<Self, EngineError> {
        config.ensure_directories()?;
        let lock = EngineLock::acquire(&config.lock_file)?;
        let store = Arc::new(JsonFileStore::new(&config.state_file));

        info!(
            state_file = %config.state_file.display(),
            retention_days = config.toml.state.retention_days,
            "Opening chain engine"
        );

        Ok(Self::builder(store)
            .tasks(Arc::new(registry_from_config(config)))
            .events(events)
            .resume_options(config.resume_options())
            .resume_on_start(config.toml.resume.enabled)
            .lock(lock)
            .build())
    }

    pub fn manager(&self) -> &Arc<ChainStateManager> {
        &self.manager
    }

    /// Startup hook: resume interrupted chains unless disabled in config.
    ///
    /// Returns `None` when resumption is disabled.
    pub async fn start(&self) -> Result<Option<ResumeHandle>, ChainError> {
        if !self.resume_on_start {
            info!("Startup resume disabled");
            return Ok(None);
        }
        self.resume().await.map(Some)
    }

    /// Run the resume pass now, regardless of the startup setting.
    pub async fn resume(&self) -> Result<ResumeHandle, ChainError> {
        self.resume.start(now_millis()).await
    }

    pub async fn submit(&self, definition: ChainDefinition) -> Result<SubmittedChain, ChainError> {
        self.submitter.submit(definition).await
    }

    pub async fn list(&self) -> Result<Vec<ChainRecord>, ChainError> {
        let mut records = self.manager.load_all().await?;
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.chain_id.cmp(&b.chain_id))
        });
        Ok(records)
    }

    pub async fn status(&self, chain_id: &str) -> Result<ChainRecord, ChainError> {
        self.manager
            .load(chain_id)
            .await?
            .ok_or_else(|| ChainError::not_found(chain_id))
    }

    /// Remove expired completed chains and, if asked, abandoned incomplete ones.
    pub async fn cleanup(&self, abandoned: bool) -> Result<CleanupReport, ChainError> {
        let now = now_millis();
        let max_age = self.options.max_age;
        let expired_removed = self.manager.cleanup_expired(now, max_age).await?;
        let abandoned_removed = if abandoned {
            purge_abandoned_chains(&self.manager, self.events.as_ref(), now, max_age).await?
        } else {
            Vec::new()
        };
        Ok(CleanupReport {
            expired_removed,
            abandoned_removed,
        })
    }

    pub async fn clear(&self) -> Result<(), ChainError> {
        self.manager.clear_all().await
    }
}

/// Built-in workers with the command worker configured from `[workers]`.
pub fn registry_from_config(config: &Config) -> WorkerRegistry {
    let mut registry = WorkerRegistry::with_builtins();
    let command = if config.toml.workers.command_enabled {
        CommandWorker::new(config.command_timeout(), Some(config.project_dir.clone()))
    } else {
        CommandWorker::disabled()
    };
    registry.register(Arc::new(command));
    registry
}
