use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::Result;
use sysinfo::{get_current_pid, Signal, System};
use tracing::debug;

/// The daemon binary is expected to sit next to the CLI binary.
pub fn daemon_executable() -> Result<PathBuf> {
    let mut path = env::current_exe()?;
    path.set_file_name("focusd-daemon");
    #[cfg(windows)]
    {
        path.set_extension("exe");
    }
    Ok(path)
}

pub fn kill_running_daemons(daemon: &Path) {
    let system = System::new_all();
    let current_id = get_current_pid().unwrap();
    for (pid, process) in system.processes().iter() {
        if *pid == current_id {
            continue;
        }
        if matches!(process.parent(), Some(p) if p == current_id) {
            continue;
        }

        if process
            .exe()
            .filter(|v| v.exists())
            .filter(|v| daemon == *v)
            .is_some()
        {
            debug!("Terminating daemon process {pid}");
            // This will forcefully terminate the process on Windows. Anything better will require a
            // lot more work.
            if process.kill_with(Signal::Term).is_none() {
                process.kill();
            }
            process.wait();
        }
    }
}

/// Replaces any running daemon with a fresh one. The daemon binary detaches
/// itself, so this returns as soon as it reports a successful launch.
pub fn restart_daemon(dir: Option<&Path>) -> Result<()> {
    let daemon = daemon_executable()?;
    kill_running_daemons(&daemon);

    let mut command = std::process::Command::new(&daemon);
    if let Some(dir) = dir {
        command.arg("--dir").arg(dir);
    }

    println!("Starting daemon");
    let status = command.status()?;
    if !status.success() {
        anyhow::bail!("Daemon failed to start ({status})");
    }
    println!("Success");
    Ok(())
}
