//! 适配器契约：把通用请求翻译成具体外部服务的协议
//!
//! execute 只在传输层失败（连接被拒、超时）时返回 Err；对端返回的 4xx / 5xx 作为
//! AdapterResponse 原样交回，由 AdapterRegistry 统一翻译成 IntegrationFailure。

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{AgentError, Payload};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterRequest {
    /// GET / POST / PUT / DELETE
    pub method: String,
    /// 相对 base_url 的路径
    pub target: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub params: Payload,
    #[serde(default)]
    pub data: Option<Value>,
}

impl AdapterRequest {
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            target: target.into(),
            headers: BTreeMap::new(),
            params: Payload::new(),
            data: None,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new("GET", target)
    }

    pub fn post(target: impl Into<String>, data: Value) -> Self {
        Self::new("POST", target).with_data(data)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterResponse {
    pub status_code: u16,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl AdapterResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            status_code: 200,
            data,
            error: None,
        }
    }

    pub fn failed(status_code: u16, error: impl Into<String>) -> Self {
        Self {
            status_code,
            data: Value::Null,
            error: Some(error.into()),
        }
    }

    /// status_code >= 400 翻译为 IntegrationFailure，否则取出 data
    pub fn into_result(self) -> Result<Value, AgentError> {
        if self.status_code >= 400 {
            let message = self
                .error
                .unwrap_or_else(|| format!("request failed with status {}", self.status_code));
            return Err(AgentError::from_status(self.status_code, message));
        }
        Ok(self.data)
    }
}

/// 外部协作方（日历、邮件、存储、工单……）
#[async_trait]
pub trait Adapter: Send + Sync {
    /// 注册名，同时作为限流资源名
    fn name(&self) -> &str;

    async fn execute(&self, request: AdapterRequest) -> Result<AdapterResponse, AgentError>;
}
