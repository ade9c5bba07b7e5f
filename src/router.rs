//! 任务路由：任务描述 → 流水线 ID
//!
//! 分类算法可替换（TaskClassifier）。默认的 KeywordClassifier 按固定优先级逐类匹配，
//! 第一个命中的类别胜出：email → finance → scheduler → document → support。
//! 都不命中时返回配置的默认流水线。route 是纯函数，同一输入永远得到同一输出。

use crate::core::{Task, TaskType};

/// 分类器：返回命中的流水线 ID，未命中返回 None
pub trait TaskClassifier: Send + Sync {
    fn classify(&self, description: &str) -> Option<String>;
}

/// 一条规则：流水线 ID + 关键词
///
/// 单词关键词按词前缀匹配（"schedul" 命中 "scheduling"），含空格的关键词按短语匹配。
#[derive(Debug, Clone)]
pub struct KeywordRule {
    pub pipeline_id: String,
    pub keywords: Vec<String>,
}

impl KeywordRule {
    pub fn new(pipeline_id: impl Into<String>, keywords: &[&str]) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    fn matches(&self, words: &[String], normalized: &str) -> bool {
        self.keywords.iter().any(|k| {
            if k.contains(' ') {
                normalized.contains(k.as_str())
            } else {
                words.iter().any(|w| w.starts_with(k.as_str()))
            }
        })
    }
}

/// 按规则顺序匹配的关键词分类器（英 / 葡）
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    rules: Vec<KeywordRule>,
}

impl KeywordClassifier {
    pub fn new(rules: Vec<KeywordRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(vec![
            KeywordRule::new(
                TaskType::Email.pipeline_id(),
                &["email", "mail", "inbox", "reply", "forward", "newsletter", "correio"],
            ),
            KeywordRule::new(
                TaskType::Finance.pipeline_id(),
                &[
                    "invoice", "payment", "pay", "bill", "expense", "budget", "financ", "fatura",
                    "pagamento", "nota fiscal", "reembolso", "despesa",
                ],
            ),
            KeywordRule::new(
                TaskType::Scheduler.pipeline_id(),
                &["schedul", "meeting", "calendar", "appointment", "agend", "reunião", "reuniao", "compromisso"],
            ),
            KeywordRule::new(
                TaskType::Document.pipeline_id(),
                &["document", "contract", "contrat", "pdf", "archive", "arquiv", "organiz"],
            ),
            KeywordRule::new(
                TaskType::Support.pipeline_id(),
                &["support", "suporte", "help", "ajuda", "problem", "ticket", "chamado", "bug", "error", "erro"],
            ),
        ])
    }
}

impl TaskClassifier for KeywordClassifier {
    fn classify(&self, description: &str) -> Option<String> {
        let lower = description.to_lowercase();
        let words: Vec<String> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
        let normalized = words.join(" ");
        self.rules
            .iter()
            .find(|rule| rule.matches(&words, &normalized))
            .map(|rule| rule.pipeline_id.clone())
    }
}

pub struct TaskRouter {
    classifier: Box<dyn TaskClassifier>,
    default_pipeline: String,
}

impl TaskRouter {
    pub fn new(default_pipeline: impl Into<String>) -> Self {
        Self::with_classifier(KeywordClassifier::default(), default_pipeline)
    }

    pub fn with_classifier(classifier: impl TaskClassifier + 'static, default_pipeline: impl Into<String>) -> Self {
        Self {
            classifier: Box::new(classifier),
            default_pipeline: default_pipeline.into(),
        }
    }

    pub fn default_pipeline(&self) -> &str {
        &self.default_pipeline
    }

    /// 从不失败：未命中时返回默认流水线
    pub fn route(&self, description: &str) -> String {
        let pipeline = self
            .classifier
            .classify(description)
            .unwrap_or_else(|| self.default_pipeline.clone());
        tracing::debug!(pipeline = %pipeline, "task routed");
        pipeline
    }

    /// 声明了类型的任务直接使用对应流水线，否则按描述路由
    pub fn resolve(&self, task: &Task) -> String {
        match task.declared_type {
            Some(t) => t.pipeline_id().to_string(),
            None => self.route(&task.description),
        }
    }
}
