//! # testenv
//!
//! Typed builders for ephemeral containers and compose environments in
//! integration tests.
//!
//! ## Architecture Overview
//!
//! - **[`container`]**: the standalone [`ContainerBuilder`] and the
//!   [`ContainerResult`](container::ContainerResult) it returns
//! - **[`compose`]**: the [`ComposeBuilder`](compose::ComposeBuilder), which
//!   starts a compose file and binds registered services to its containers
//! - **[`service`]**: the [`ContainerService`](service::ContainerService)
//!   contract and the [`CustomService`](service::CustomService) base
//! - **[`lifecycle`]**: the `uninitialized -> running -> stopped` state
//!   machine shared by everything that owns a container
//! - **[`error`]**: the error taxonomy; every public operation returns
//!   [`Error`], whose kind can be tested with [`is_error`]
//! - **[`runtime`]**: the seam to the container runtime, with a Docker
//!   implementation and an in-memory one for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use testenv::{ContainerBuilder, wait::WaitStrategy};
//!
//! #[tokio::main]
//! async fn main() -> testenv::Result<()> {
//!     let redis = ContainerBuilder::new("redis:7-alpine")
//!         .with_exposed_port(6379)
//!         .with_wait_strategy(WaitStrategy::log_text("Ready to accept connections")?)
//!         .start()
//!         .await?;
//!
//!     println!("redis on {}:{}", redis.host(), redis.mapped_port(6379)?);
//!     redis.cleanup().await
//! }
//! ```
//!
//! ## Configuration
//!
//! [`Settings`] are read from `$TESTENV_CONFIG`, `./testenv.toml` or
//! `~/.testenv.toml`, then overridden by `TESTENV_*` environment variables.

pub mod compose;
pub mod container;
pub mod env;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod runtime;
pub mod service;
pub mod settings;
pub mod wait;

pub use compose::{ComposeBuilder, ComposeResult};
pub use container::{ContainerBuilder, ContainerResult};
pub use error::{Error, ErrorKind, Result, is_error};
pub use service::{ContainerService, CustomService, ServiceDescriptor};
pub use settings::Settings;
