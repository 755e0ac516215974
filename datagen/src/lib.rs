#![cfg_attr(
    not(test),
    warn(clippy::print_stdout, clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

pub mod config;
pub mod datapoint;
pub mod generator;
pub mod pipeline;
pub mod queue;
pub mod sink;
pub mod utils;
pub mod writer;
