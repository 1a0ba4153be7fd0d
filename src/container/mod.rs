//! Standalone containers.
//!
//! The container module is organized into several components:
//!
//! - [`ContainerBuilder`]: fluent configuration and the ordered start sequence
//! - [`ContainerConfig`]: the plain record the builder accumulates
//! - [`LaunchPlan`]: pure translation of that record into a [`ContainerRequest`]
//! - [`StartedContainer`]: live handle used by results and services
//! - [`ContainerResult`]: what `start()` returns, with `exec`, `logs`,
//!   `restart`, `ip_address` and `cleanup`
//! - [`Network`]: user-defined networks containers can join

mod builder;
mod config;
mod exec;
mod network;
mod request;
mod result;
mod started;

pub use builder::ContainerBuilder;
pub use config::{
    BuildSpec, ContainerConfig, CopyToContainer, ExposedPort, ImageSource, NetworkRef, Protocol,
    PullPolicy, ResourceLimits,
};
pub use exec::{ExecConfig, ExecOutput};
pub use network::Network;
pub use request::{ContainerRequest, ImagePlan, LaunchPlan, validate_image_reference};
pub use result::ContainerResult;
pub use started::{ContainerLogs, StartedContainer};
