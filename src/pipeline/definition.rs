//! 流水线定义与构建器
//!
//! 步骤顺序在构建时固定，运行期不可调整，同一输入可按相同顺序重放。

use std::collections::HashSet;
use std::future::Future;

use crate::core::{AgentError, Payload};
use crate::pipeline::{Step, StepContext};

/// 有序的命名步骤序列
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    id: String,
    description: String,
    steps: Vec<Step>,
}

impl PipelineDefinition {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(Step::name).collect()
    }
}

/// 流水线构建器
pub struct PipelineBuilder {
    id: String,
    description: String,
    steps: Vec<Step>,
}

impl PipelineBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            steps: Vec::new(),
        }
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// 追加异步步骤
    pub fn then<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Payload, StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, AgentError>> + Send + 'static,
    {
        self.step(Step::new(name, f))
    }

    /// 追加同步步骤
    pub fn then_sync<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Payload, &StepContext) -> Result<Payload, AgentError> + Send + Sync + 'static,
    {
        self.step(Step::sync(name, f))
    }

    /// 构建；ID 为空、没有步骤或步骤重名时返回 Pipeline 错误
    pub fn build(self) -> Result<PipelineDefinition, AgentError> {
        if self.id.trim().is_empty() {
            return Err(AgentError::Pipeline("pipeline id is required".to_string()));
        }
        if self.steps.is_empty() {
            return Err(AgentError::Pipeline(format!("pipeline {} has no steps", self.id)));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name()) {
                return Err(AgentError::Pipeline(format!(
                    "pipeline {}: duplicate step {}",
                    self.id,
                    step.name()
                )));
            }
        }
        Ok(PipelineDefinition {
            id: self.id,
            description: self.description,
            steps: self.steps,
        })
    }
}
