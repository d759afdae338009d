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

pub mod automata;
mod daemons;
#[cfg(feature = "shell")]
mod opts;
mod runtime;
pub mod split;

pub use daemons::{process_launcher, Daemon, DaemonError, DaemonHandle, PartLauncher};
#[cfg(feature = "shell")]
pub use opts::Opts;
pub use runtime::{run, Runtime};
