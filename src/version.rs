//! Build metadata embedded by `build.rs`.
//!
//! Printed by `huginn-cache --version` and logged once when the maintenance
//! tool starts, so a report about a corrupt store can be tied to a build.

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

const UNKNOWN: &str = "unknown";

/// Git branch at build time, or "unknown" outside a checkout.
pub const GIT_BRANCH: &str = match option_env!("VERGEN_GIT_BRANCH") {
    Some(branch) => branch,
    None => UNKNOWN,
};

/// Git commit SHA at build time, or "unknown" outside a checkout.
pub const GIT_SHA: &str = match option_env!("VERGEN_GIT_SHA") {
    Some(sha) => sha,
    None => UNKNOWN,
};

/// RFC 3339 build timestamp, or "unknown".
pub const BUILD_TIMESTAMP: &str = match option_env!("VERGEN_BUILD_TIMESTAMP") {
    Some(ts) => ts,
    None => UNKNOWN,
};

fn git_dirty() -> bool {
    option_env!("VERGEN_GIT_DIRTY") == Some("true")
}

/// `{version}+{branch}.{sha7}[.dirty]`, or plain `{version}` when the crate
/// was built without git metadata (e.g. from a crates.io tarball).
pub fn version_string() -> String {
    if GIT_SHA == UNKNOWN {
        return PKG_VERSION.to_string();
    }
    let dirty_suffix = if git_dirty() { ".dirty" } else { "" };
    format!(
        "{PKG_VERSION}+{GIT_BRANCH}.{}{dirty_suffix}",
        &GIT_SHA[..7.min(GIT_SHA.len())]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_pkg_version() {
        assert!(version_string().starts_with(PKG_VERSION));
    }

    #[test]
    fn version_string_carries_sha_prefix_when_known() {
        let version = version_string();
        if GIT_SHA != UNKNOWN {
            assert!(version.contains(&GIT_SHA[..7.min(GIT_SHA.len())]));
        } else {
            assert_eq!(version, PKG_VERSION);
        }
    }
}
