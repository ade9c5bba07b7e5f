//! 流水线：步骤、定义与构建器、执行引擎、内置业务流水线

pub mod builtin;
pub mod definition;
pub mod engine;
pub mod step;

pub use definition::{PipelineBuilder, PipelineDefinition};
pub use engine::{PipelineEngine, TAGS_KEY};
pub use step::{str_field, Step, StepContext, StepFuture};
