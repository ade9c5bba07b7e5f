//! 通用 HTTP 适配器（reqwest）
//!
//! target 拼接在 base_url 之后；params 作为查询串，data 作为 JSON 请求体。
//! 配置了 api_key 时携带 `Authorization: Bearer <key>`；所有请求带固定 User-Agent。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Url};
use serde_json::Value;

use crate::config::IntegrationSection;
use crate::core::{AgentError, IntegrationKind};
use crate::integrations::{Adapter, AdapterRequest, AdapterResponse};

const USER_AGENT: &str = concat!("kaleb/", env!("CARGO_PKG_VERSION"));

pub struct HttpAdapter {
    name: String,
    base_url: String,
    /// 预先校验过的 `Bearer <key>`
    auth: Option<HeaderValue>,
    client: Client,
}

impl HttpAdapter {
    /// base_url 非法或 HTTP 客户端无法创建时返回 Configuration 错误
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Result<Self, AgentError> {
        let name = name.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| AgentError::Configuration(format!("integrations.{name}.base_url '{base_url}': {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AgentError::Configuration(format!("integrations.{name}: cannot build HTTP client: {e}")))?;
        Ok(Self {
            name,
            base_url,
            auth: None,
            client,
        })
    }

    pub fn from_config(name: &str, cfg: &IntegrationSection) -> Result<Self, AgentError> {
        let adapter = Self::new(name, cfg.base_url.clone(), Duration::from_secs(cfg.timeout_secs))?;
        match cfg.api_key {
            Some(ref key) => adapter.with_api_key(key),
            None => Ok(adapter),
        }
    }

    /// api_key 含有不能出现在请求头中的字符时返回 Configuration 错误
    pub fn with_api_key(mut self, api_key: &str) -> Result<Self, AgentError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| AgentError::Configuration(format!("integrations.{}.api_key is not a valid header value", self.name)))?;
        value.set_sensitive(true);
        self.auth = Some(value);
        Ok(self)
    }

    fn url_for(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            return target.to_string();
        }
        format!("{}/{}", self.base_url, target.trim_start_matches('/'))
    }

    fn method(&self, request: &AdapterRequest) -> Result<Method, AgentError> {
        Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            AgentError::integration(
                IntegrationKind::ClientError,
                format!("{}: invalid method {}", self.name, request.method),
            )
        })
    }
}

fn query_pairs(request: &AdapterRequest) -> Vec<(String, String)> {
    request
        .params
        .iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), v)
        })
        .collect()
}

fn transport_error(adapter: &str, e: reqwest::Error) -> AgentError {
    let kind = if e.is_timeout() {
        IntegrationKind::Timeout
    } else if e.is_connect() {
        IntegrationKind::ConnectionRefused
    } else {
        IntegrationKind::Other
    };
    AgentError::integration(kind, format!("{adapter}: {e}"))
}

#[async_trait]
impl Adapter for HttpAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: AdapterRequest) -> Result<AdapterResponse, AgentError> {
        let mut builder = self
            .client
            .request(self.method(&request)?, self.url_for(&request.target))
            .query(&query_pairs(&request));
        if let Some(ref auth) = self.auth {
            builder = builder.header(AUTHORIZATION, auth.clone());
        }
        for (k, v) in &request.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if let Some(ref data) = request.data {
            builder = builder.json(data);
        }

        let resp = builder.send().await.map_err(|e| transport_error(&self.name, e))?;
        let status_code = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| transport_error(&self.name, e))?;

        if status_code >= 400 {
            return Ok(AdapterResponse::failed(status_code, body));
        }
        let data = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body).unwrap_or(Value::String(body))
        };
        Ok(AdapterResponse {
            status_code,
            data,
            error: None,
        })
    }
}
