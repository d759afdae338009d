// MPP Node: node coordinating multi-part lightning network payments.
// Written in 2020-2022 by
//     Dr. Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

use std::fmt::{Debug, Display};
use std::process::{self, Child, ExitStatus};
use std::{io, thread};

use amplify::IoError;

use crate::payd::runtime::Runtime;
use crate::rpc::PartId;
use crate::{Config, Error};

/// Handle for a child worker launched by payd
#[derive(Debug)]
pub enum DaemonHandle<DaemonName: Display + Clone> {
    /// Daemon launched as a separate process
    Process(DaemonName, process::Child),

    /// Daemon launched as a thread (used by embedders and test launchers
    /// substituting the process executor)
    Thread(DaemonName, thread::JoinHandle<Result<(), Error>>),
}

/// Errors during daemon launching
#[derive(Debug, Error, Display, From)]
#[display(doc_comments)]
pub enum DaemonError<DaemonName: Debug + Display + Clone> {
    /// thread `{0}` has exited with an error.
    ///
    /// Error details: {1}
    ThreadAborted(DaemonName, Error),

    /// thread `{0}` failed to launch
    ThreadLaunch(DaemonName),

    /// process `{0}` has exited with a non-zero exit status {1}
    ProcessAborted(DaemonName, ExitStatus),

    /// I/O error {1} during process `{0}` execution
    ProcessLaunch(DaemonName, IoError),
}

impl<DaemonName: Debug + Display + Clone> DaemonHandle<DaemonName> {
    /// Waits for daemon execution completion on the handler.
    ///
    /// # Returns
    ///
    /// On error or upon thread/process successful completion. For process
    /// this means that the process has exited with status 0.
    ///
    /// # Errors
    /// - if the thread failed to start;
    /// - if it failed to join the thread;
    /// - if the process exit status was not 0
    pub fn join(self) -> Result<(), DaemonError<DaemonName>> {
        match self {
            DaemonHandle::Process(name, mut proc) => proc
                .wait()
                .map_err(|io| DaemonError::ProcessLaunch(name.clone(), io.into()))
                .and_then(|status| {
                    if status.success() {
                        Ok(())
                    } else {
                        Err(DaemonError::ProcessAborted(name, status))
                    }
                }),
            DaemonHandle::Thread(name, thread) => thread
                .join()
                .map_err(|_| DaemonError::ThreadLaunch(name.clone()))?
                .map_err(|err| DaemonError::ThreadAborted(name, err)),
        }
    }
}

/// Daemons that can be launched by payd
#[derive(Clone, Eq, PartialEq, Debug, Display)]
pub enum Daemon {
    /// Child payment worker attempting delivery of a single HTLC part
    #[display("partd")]
    Partd(PartId),
}

impl Daemon {
    pub fn bin_name(&self) -> &'static str {
        match self {
            Daemon::Partd(..) => "partd",
        }
    }
}

/// Capability launching one child worker per payment part.
///
/// Kept as a runtime field so embedders and tests can substitute the default
/// process executor with deterministic doubles.
pub type PartLauncher =
    Box<dyn FnMut(Daemon, &Config) -> Result<DaemonHandle<Daemon>, DaemonError<Daemon>> + Send>;

/// Constructs the default launcher executing a separate `partd` process per
/// child payment attempt.
pub fn process_launcher() -> PartLauncher {
    Box::new(|daemon, _config| exec_daemon(daemon))
}

fn exec_daemon(daemon: Daemon) -> Result<DaemonHandle<Daemon>, DaemonError<Daemon>> {
    let mut bin_path = std::env::current_exe().map_err(|err| {
        error!("Unable to detect binary directory: {}", err);
        DaemonError::ProcessLaunch(daemon.clone(), err.into())
    })?;
    bin_path.pop();
    bin_path.push(daemon.bin_name());
    #[cfg(target_os = "windows")]
    bin_path.set_extension("exe");

    debug!(
        "Launching {} as a separate process using `{}` as binary",
        daemon.clone(),
        bin_path.display()
    );

    let mut cmd = process::Command::new(bin_path);
    cmd.args(std::env::args().skip(1));

    match &daemon {
        Daemon::Partd(part_id) => {
            cmd.args(&[part_id.to_string()]);
        }
    }

    trace!("Executing `{:?}`", cmd);
    let child: Child = cmd.spawn().map_err(|err: io::Error| {
        error!("Error launching {}: {}", daemon.clone(), err);
        DaemonError::ProcessLaunch(daemon.clone(), err.into())
    })?;
    Ok(DaemonHandle::Process(daemon, child))
}

impl Runtime {
    pub(super) fn launch_daemon(
        &mut self,
        daemon: Daemon,
    ) -> Result<DaemonHandle<Daemon>, DaemonError<Daemon>> {
        let config = self.config.clone();
        (self.launcher)(daemon, &config)
    }
}
