//! 平台构建器：从 AppConfig 统一组装各组件
//!
//! 弹性层 → 适配器注册表 → 记忆后端与检索索引 → 会话管理 → 流水线引擎（注册内置流水线）→ 路由 → 编排器。

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{load_config, AppConfig, MemoryBackend, MAX_AGE_DAYS_LIMIT};
use crate::core::{AgentError, Orchestrator};
use crate::integrations::{AdapterRegistry, HttpAdapter};
use crate::memory::{InMemoryStore, MaxAge, MaxCount, MemoryRetriever, MemoryStore, SqliteMemoryStore};
use crate::pipeline::{builtin, PipelineEngine};
use crate::resilience::Resilience;
use crate::router::TaskRouter;
use crate::session::ContextManager;

pub struct PlatformBuilder {
    config: AppConfig,
    registry: Option<AdapterRegistry>,
    store: Option<Arc<dyn MemoryStore>>,
}

impl PlatformBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            registry: None,
            store: None,
        }
    }

    /// 使用外部准备好的适配器注册表（替代按配置创建 HttpAdapter）
    pub fn with_registry(mut self, registry: AdapterRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 使用指定的记忆存储（替代 memory.backend）
    pub fn with_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 每个 enabled 的 [integrations.<name>] 注册一个 HttpAdapter；任何一个无法创建都是 Configuration 错误
    pub fn build_registry(&self) -> Result<AdapterRegistry, AgentError> {
        let mut registry = AdapterRegistry::new(Resilience::from_config(&self.config));
        let mut enabled: Vec<_> = self
            .config
            .integrations
            .iter()
            .filter(|(_, section)| section.enabled)
            .collect();
        enabled.sort_by(|a, b| a.0.cmp(b.0));
        for (name, section) in enabled {
            registry.register(HttpAdapter::from_config(name, section)?);
            tracing::info!(adapter = %name, base_url = %section.base_url, "adapter registered");
        }
        Ok(registry)
    }

    pub fn build_store(&self) -> Result<Arc<dyn MemoryStore>, AgentError> {
        match self.config.memory.backend {
            MemoryBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
            MemoryBackend::Sqlite => {
                let store = SqliteMemoryStore::open(&self.config.memory.db_path)?;
                tracing::info!(path = %self.config.memory.db_path.display(), "sqlite memory store opened");
                Ok(Arc::new(store))
            }
        }
    }

    /// 组装引擎；持久化后端中已有的记录会被重新索引
    pub fn build_engine(mut self) -> Result<PipelineEngine, AgentError> {
        let registry = match self.registry.take() {
            Some(registry) => registry,
            None => self.build_registry()?,
        };
        let store = match self.store.take() {
            Some(store) => store,
            None => self.build_store()?,
        };

        let retriever = MemoryRetriever::new(store);
        let indexed = retriever.rebuild()?;
        if indexed > 0 {
            tracing::info!(records = indexed, "memory index rebuilt");
        }

        let context = ContextManager::new(self.config.app.max_history, self.config.app.session_timeout_secs);
        let mut engine = PipelineEngine::new(Arc::new(context), Arc::new(retriever), Arc::new(registry))
            .with_relevance_limit(self.config.memory.relevance_limit);
        builtin::register_all(&mut engine)?;
        Ok(engine)
    }

    pub fn build(self) -> Result<Orchestrator, AgentError> {
        let default_pipeline = self.config.app.default_pipeline.clone();
        let concurrency = self.config.batch.concurrency;
        let memory = self.config.memory.clone();
        let engine = self.build_engine()?;
        if !engine.has_pipeline(&default_pipeline) {
            return Err(AgentError::Configuration(format!(
                "app.default_pipeline '{default_pipeline}' is not a registered pipeline"
            )));
        }
        let router = TaskRouter::new(default_pipeline);
        let mut orchestrator = Orchestrator::new(engine, router).with_concurrency(concurrency);
        if let Some(days) = memory.max_age_days {
            let days = days.min(MAX_AGE_DAYS_LIMIT) as i64;
            orchestrator = orchestrator.with_retention(MaxAge(chrono::Duration::days(days)));
        }
        if let Some(max_records) = memory.max_records {
            orchestrator = orchestrator.with_retention(MaxCount(max_records));
        }
        Ok(orchestrator)
    }
}

/// 便捷函数：加载配置（含校验）并构建编排器
pub fn build_orchestrator(config_path: Option<PathBuf>) -> Result<(AppConfig, Orchestrator), AgentError> {
    let config = load_config(config_path)?;
    let orchestrator = PlatformBuilder::new(config.clone()).build()?;
    Ok((config, orchestrator))
}
