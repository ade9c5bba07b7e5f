//! 外部协作方适配器：契约、注册表与通用 HTTP 实现

pub mod adapter;
pub mod http;
pub mod registry;

pub use adapter::{Adapter, AdapterRequest, AdapterResponse};
pub use http::HttpAdapter;
pub use registry::AdapterRegistry;
