//! Build metadata embedded by the build script.

use serde::Serialize;

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git branch at build time, or "unknown" if unavailable.
pub const GIT_BRANCH: &str = match option_env!("VERGEN_GIT_BRANCH") {
    Some(branch) => branch,
    None => "unknown",
};

/// Git commit SHA at build time, or "unknown" if unavailable.
pub const GIT_SHA: &str = match option_env!("VERGEN_GIT_SHA") {
    Some(sha) => sha,
    None => "unknown",
};

/// Target triple the binary was compiled for.
pub const TARGET_TRIPLE: &str = match option_env!("VERGEN_CARGO_TARGET_TRIPLE") {
    Some(triple) => triple,
    None => "unknown",
};

/// Serializable build summary, reported by `/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_branch: &'static str,
    pub git_sha: &'static str,
    pub target: &'static str,
}

/// Build summary for this binary.
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: PKG_VERSION,
        git_branch: GIT_BRANCH,
        git_sha: short_sha(),
        target: TARGET_TRIPLE,
    }
}

fn short_sha() -> &'static str {
    &GIT_SHA[..7.min(GIT_SHA.len())]
}

/// `{version}+{branch}.{sha}`, e.g. `0.3.0+main.abc1234`.
pub fn version_string() -> String {
    format!("{PKG_VERSION}+{GIT_BRANCH}.{}", short_sha())
}
