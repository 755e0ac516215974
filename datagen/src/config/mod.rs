mod endpoint;
mod pipeline;

pub use self::{
    endpoint::EndpointConfig,
    pipeline::{ConfigError, PipelineConfig, PipelinePlan, RunMode},
};
