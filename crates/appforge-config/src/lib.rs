//! KDL configuration parsing for AppForge.
//!
//! This crate handles parsing of:
//! - System configuration (appforge.kdl)
//! - `${env.NAME}` interpolation in string values

pub mod error;
pub mod system;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    ArtifactsConfig, BuildsConfig, DatabaseConfig, DeployerConfig, GeneratorConfig, GitHubConfig,
    ImageBuildConfig, ReconcilerConfig, ServerConfig, SystemConfig, load_system_config,
    parse_system_config, parse_system_config_with_env,
};
pub use variables::{EnvLookup, ProcessEnv, interpolate};
