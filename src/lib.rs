//! Hydra local service supervisor
//!
//! Runs a topology of interdependent local services, each switched into one of
//! several named modes, and supervises their lifecycles from one terminal:
//! mode-driven command resolution, spawning, output forwarding and graceful
//! termination of whole process trees.

pub mod cli;
pub mod config;
pub mod dependency;
pub mod dotenv;
pub mod error;
pub mod process;
pub mod process_tree;
pub mod supervisor;
pub mod template;
pub mod topology;

pub use config::Configuration;
pub use error::{HydraError, Result};
pub use supervisor::{LaunchPlan, LogHandler, ProcessSupervisor};
pub use topology::{DependencySpec, Mode, RunSpec, ServiceDefinition};

/// Application constants
pub mod constants {
    use std::time::Duration;

    /// Wait between the graceful and the forceful signal sent to a descendant
    pub const GRACE_PERIOD: Duration = Duration::from_secs(1);

    /// Shell used when a mode does not name one
    pub const DEFAULT_SHELL: &str = "/bin/sh";

    /// Prefix of every status line emitted by the supervisor itself
    pub const LOG_PREFIX: &str = "## HYDRA ##: ";

    /// Name of the dotenv file written into a service's working directory
    pub const DOTENV_FILE: &str = ".env";

    /// Topology file looked up when none is given on the command line
    pub const DEFAULT_TOPOLOGY: &str = "topology.json";
}
