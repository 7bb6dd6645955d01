//! Docker sandbox for running untrusted programs.
//!
//! Every execution gets its own short-lived container created from a
//! versioned base image, with networking disabled and a memory cap. The
//! `Runner` drives a session from image resolution to teardown; the
//! `ImageBuilder` produces the images it runs on.

mod builder;
mod docker;
mod engine;
mod error;
mod inject;
mod language;
mod lifecycle;
#[cfg(test)]
pub(crate) mod mock;
mod policy;
mod runner;
mod services;
mod teardown;

pub use builder::ImageBuilder;
pub use docker::DockerEngine;
pub use engine::ContainerEngine;
pub use error::{BuildError, ErrorKind, ExecError};
pub use language::Language;
pub use policy::Caller;
pub use runner::{RunRequest, Runner};
pub use services::{ImageCatalog, StatsRecorder};
