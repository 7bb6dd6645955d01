//! Language descriptors, read-only to the runner.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::default_time_limit;

/// How to run programs of one language inside the sandbox image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    pub name: String,
    /// Shell command that launches the injected program
    pub start_command: String,
    /// Destination path of the injected source inside the container
    pub main_file: String,
    #[serde(default = "default_time_limit")]
    pub time_limit_ms: u64,
}

impl Language {
    pub fn new(
        name: impl Into<String>,
        start_command: impl Into<String>,
        main_file: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            start_command: start_command.into(),
            main_file: main_file.into(),
            time_limit_ms: default_time_limit(),
        }
    }

    #[must_use]
    pub fn with_time_limit_ms(mut self, time_limit_ms: u64) -> Self {
        self.time_limit_ms = time_limit_ms;
        self
    }

    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.time_limit_ms)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
