//! Host platform (linux for example) utility functions

use std::env;
use std::path::PathBuf;

/// Environment variable holding the root directory of the sorter software.
///
/// Parameter files are read from `$FABRIC_SORTER_SW_ROOT/params` and sessions are written to
/// `$FABRIC_SORTER_SW_ROOT/sessions`.
pub const SW_ROOT_ENV_VAR: &str = "FABRIC_SORTER_SW_ROOT";

/// Short description of the platform the executable is running on.
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub os: &'static str,
    pub arch: &'static str,
    pub family: &'static str,
}

/// Get the software root directory.
pub fn get_sw_root() -> Result<PathBuf, env::VarError> {
    env::var(SW_ROOT_ENV_VAR).map(PathBuf::from)
}

/// Retrieve information about the host platform.
pub fn get_host_info() -> HostInfo {
    HostInfo {
        os: env::consts::OS,
        arch: env::consts::ARCH,
        family: env::consts::FAMILY,
    }
}
