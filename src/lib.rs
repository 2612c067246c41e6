//! Repository compose orchestration for RHEL-family distribution mirrors.
//!
//! A compose is a dated directory of package repositories synced from a build
//! system, plus the installer metadata that makes those trees bootable and
//! mirrorable. This crate drives the whole lifecycle:
//!
//! - **Compose layout** - dated compose directories and the `latest` pointer
//! - **Sync** - repo config generation, job planning, reposync commands
//! - **Workers** - container (or local process) workers run in batches
//! - **Metadata** - `.treeinfo`, `.discinfo`, `media.repo`, compose metadata
//! - **Closure and closeout** - dependency checks, moving built media in
//!
//! # Architecture
//!
//! ```text
//! compose-builder (binary)
//!     │
//!     └── ComposeSync (orchestrator)
//!             ├── ComposeLayout / ComposeLock      compose/
//!             ├── RepoConfigGenerator + plan        sync/
//!             ├── WorkerExecutor + WorkerRuntime    worker/
//!             ├── MetadataWriter / TreeinfoTweaker  metadata/
//!             ├── RepoClosureRunner                 closure
//!             └── closeout                          closeout
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use compose_builder::config::{ComposeConfig, ComposeRun, RunMode};
//! use compose_builder::orchestrator::ComposeSync;
//! use compose_builder::worker::ContainerRuntime;
//!
//! let config = ComposeConfig::load("/etc/compose-builder/compose.toml".as_ref())?;
//! let profile = config.profile("9")?;
//! let runtime = ContainerRuntime::detect(config.site.container_runtime.as_deref())?;
//!
//! let run = ComposeRun::new(RunMode::Full);
//! ComposeSync::new(&config.site, &profile, &runtime).run(&run)?;
//! ```

pub mod checksum;
pub mod closeout;
pub mod closure;
pub mod compose;
pub mod config;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod orchestrator;
pub mod preflight;
pub mod process;
pub mod sync;
pub mod worker;

pub use config::{ComposeConfig, ComposeProfile, ComposeRun, RunMode};
pub use error::{exit_code_for, ComposeError};
pub use orchestrator::{ComposeSync, RunSummary};
