//! Repository synchronization: config generation, job planning and the typed
//! reposync jobs the executor runs.

pub mod commands;
pub mod plan;
pub mod repo_config;

pub use commands::{worker_mounts, SyncCommandBuilder};
pub use plan::{batches, plan, SyncJobSpec, VariantKind, SOURCE_ARCH};
pub use repo_config::{materialize_arch_configs, RepoConfigGenerator};
