//! 批处理文件格式
//!
//! 输入：JSON 数组 `[{"task": "...", "type": "finance"}]`，type 可省略（交给路由分类）。
//! 输出：与输入等长、同序的 `{task, type, result}` 数组，写入 `batch_results_<YYYYmmdd_HHMMSS>.json`。

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::{ExecutionResult, Task, TaskType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub task: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<TaskType>,
}

impl BatchItem {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            task_type: None,
        }
    }

    pub fn typed(task: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            task: task.into(),
            task_type: Some(task_type),
        }
    }

    pub fn to_task(&self) -> Task {
        let task = Task::new(self.task.clone());
        match self.task_type {
            Some(t) => task.with_type(t),
            None => task,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutput {
    pub task: String,
    /// 实际执行的流水线
    #[serde(rename = "type")]
    pub pipeline_id: String,
    pub result: ExecutionResult,
}

pub fn load_items(path: impl AsRef<Path>) -> anyhow::Result<Vec<BatchItem>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read batch file {}", path.display()))?;
    let items: Vec<BatchItem> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid batch file {}", path.display()))?;
    Ok(items)
}

/// 写出结果文件，返回其路径；目录不存在时创建
pub fn write_results(dir: impl AsRef<Path>, outputs: &[BatchOutput]) -> anyhow::Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output dir {}", dir.display()))?;
    let file = dir.join(format!("batch_results_{}.json", Utc::now().format("%Y%m%d_%H%M%S")));
    let json = serde_json::to_string_pretty(outputs)?;
    std::fs::write(&file, json).with_context(|| format!("Failed to write {}", file.display()))?;
    tracing::info!(path = %file.display(), items = outputs.len(), "batch results written");
    Ok(file)
}
