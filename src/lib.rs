//! **beiwe-registry** - Deduplicating registry builder for raw Beiwe data
//!
//! Merges overlapping downloads of the same study into one chronological,
//! duplicate-free index of raw files per user, bounded to an optional time
//! window, and rolls users up into a documented project registry.

/// Command-line interface with clap integration
pub mod cli;

/// Shell completion generation
pub mod completion;

/// Registry engine - merge, register, discover and aggregate
pub mod core {
    /// Error taxonomy shared by the engine
    pub mod error;
    pub use error::{RegistryError, Result};

    /// Filename timestamp keys and inclusive time windows
    pub mod timekey;
    pub use timekey::{KeyRange, TimeWindow, TimestampKey};

    /// Deduplicating merge of overlapping directories
    pub mod merge;
    pub use merge::{FileMerger, MergedStream, RawFileRef, run as merge_run};

    /// Passive stream, survey and audio registration across roots
    pub mod registrar;
    pub use registrar::{Registrar, Registration, SurveyStreams};

    /// Per-user discovery of streams, surveys, audio and irregular folders
    pub mod discover;
    pub use discover::{UserInventory, discover_user};

    /// Identifiers files, device history and OS normalisation
    pub mod device;
    pub use device::{DeviceInfo, DeviceOs, OsPolicy};

    /// One user's registry and its builder
    pub mod user;
    pub use user::{BuildOptions, UserRegistry, UserRegistryBuilder, run as user_run};

    /// Project registry over all users, with export/load
    pub mod project;
    pub use project::{
        Assignment, ProjectOptions, ProjectRegistry, ProjectRegistryBuilder, UserSelection,
        run as registry_run,
    };

    /// Summary tables and the user summary CSV
    pub mod report;
    pub use report::UserSummary;
}

/// Infrastructure - configuration, logging and directory scanning
pub mod infra {
    /// Configuration management with TOML/YAML/JSON files and BWREG_ env vars
    pub mod config;
    pub use config::{Config, init as config_init, load_config};

    /// tracing-subscriber setup for the binary
    pub mod logging;

    /// Directory scanning with ignore globs
    pub mod walk;
    pub use walk::DirWalker;
}

// Strategic re-exports for clean CLI interface
pub use crate::cli::{AppContext, Cli, Commands};
pub use crate::core::{merge_run, registry_run, user_run};
pub use crate::infra::{Config, DirWalker, load_config};

// Core types for external consumers
pub use crate::core::{
    MergedStream, ProjectRegistry, ProjectRegistryBuilder, RawFileRef, RegistryError, TimeWindow,
    TimestampKey, UserRegistry, UserRegistryBuilder,
};
