//! autopilot - autonomous coding agent turn loop
//!
//! Runtime components: the generation client, workspace/command/version-control
//! collaborators, the decision executor, and the turn loop that ties them together.

pub mod executor;
pub mod generator;
pub mod git;
pub mod orchestrator;
pub mod shell;
pub mod workspace;

pub use executor::Executor;
pub use generator::{Generator, GeneratorConfig, HttpGenerator};
pub use git::{GitCli, VersionControl};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use shell::{CommandRunner, ShellRunner};
pub use workspace::Workspace;
