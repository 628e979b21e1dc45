//! Config file loading and command-line overrides.
//!
//! Precedence, lowest to highest: built-in defaults, the TOML file,
//! environment variables, then flags. Clap folds the environment into the
//! flag values, so only the file step happens here.

use std::path::Path;

use ember_cluster_client::ClusterConfig;

/// Reads a TOML config file.
pub fn from_file(path: &Path) -> Result<ClusterConfig, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    toml::from_str(&text).map_err(|e| format!("invalid config {}: {e}", path.display()))
}

/// Renders a config as TOML. Used for `--config-template`.
pub fn to_toml(config: &ClusterConfig) -> Result<String, String> {
    toml::to_string_pretty(config).map_err(|e| format!("failed to render config: {e}"))
}

/// Applies seed and password flags on top of a loaded config.
///
/// Seeds given on the command line replace the file's list. The password
/// is attached to every seed that does not already carry one.
pub fn apply_overrides(config: &mut ClusterConfig, seeds: &[String], password: Option<&str>) {
    if !seeds.is_empty() {
        config.seeds = seeds.iter().map(|s| s.trim().to_string()).collect();
    }
    if let Some(pw) = password.filter(|pw| !pw.is_empty()) {
        for seed in &mut config.seeds {
            if !seed.contains('@') {
                *seed = format!("{pw}@{seed}");
            }
        }
    }
}
