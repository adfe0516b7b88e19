//! Orchestration primitives for running several long-lived services in one
//! process with shared shutdown handling.

mod service;

pub use service::{Service, ServiceContext, ServiceRunner, random_jitter, run_services};
