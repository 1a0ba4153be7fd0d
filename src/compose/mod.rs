//! Compose environments.
//!
//! A [`ComposeBuilder`] pairs one compose file with a set of registered
//! [`ContainerService`](crate::service::ContainerService)s. `start()` runs in
//! a fixed order:
//!
//! 1. build the [`ComposeDefinition`] from the builder's [`ComposeConfig`]
//! 2. apply each service's [`ComposeHooks`](crate::service::ComposeHooks)
//! 3. `up` through the [`ComposeEngine`], then wait for per-service readiness
//! 4. bind every service to its container
//! 5. collect typed connection info into a [`ConnectionInfoMap`]
//! 6. return a [`ComposeResult`] holding the network name and `cleanup()`
//!
//! Engines: [`DockerComposeEngine`] drives `docker compose` (feature
//! `docker`); [`RecordingComposeEngine`] is the in-memory counterpart.

mod builder;
mod config;
mod definition;
#[cfg(feature = "docker")]
mod docker;
mod engine;
mod recording;
mod result;

pub use builder::ComposeBuilder;
pub use config::{ComposeConfig, DownOptions, RecreatePolicy, RemoveImages};
pub use definition::ComposeDefinition;
#[cfg(feature = "docker")]
pub use docker::{ComposeCommandError, DockerComposeEngine};
pub use engine::ComposeEngine;
pub use recording::{ComposeOp, RecordingComposeEngine};
pub(crate) use result::RegisteredService;
pub use result::{ComposeResult, ConnectionInfoMap};
