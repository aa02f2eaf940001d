//! Box process spawning.

use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};

use super::limits::BoxLimits;
use crate::vmm::LaunchSpec;
use boxlite_shared::errors::{BoxliteError, BoxliteResult};

/// Environment variable exposing the owning box id to the box process.
pub(super) const BOX_ID_ENV: &str = "BOXLITE_BOX_ID";

/// Spawns the box process with piped stdout/stderr in its own process group.
///
/// `image` is the program, `args` are appended, `env` is added on top of the
/// inherited environment. Resource limits are applied before exec.
pub(super) fn spawn_box_process(spec: &LaunchSpec) -> BoxliteResult<Child> {
    let mut cmd = Command::new(&spec.image);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k, v)))
        .env(BOX_ID_ENV, spec.box_id.as_str());

    // Null stdin so the box never competes with the host for the terminal
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    // Own process group: terminate/pause signal the whole box, and a Ctrl-C
    // aimed at the host does not reach it.
    cmd.process_group(0);

    let limits = BoxLimits::from_spec(spec);
    unsafe {
        cmd.pre_exec(move || {
            limits
                .apply_raw()
                .map_err(std::io::Error::from_raw_os_error)
        });
    }

    cmd.spawn().map_err(|e| {
        BoxliteError::Engine(format!(
            "Failed to spawn box process {}: {}",
            spec.image, e
        ))
    })
}
