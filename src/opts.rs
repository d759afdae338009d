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

use std::fs;
use std::path::PathBuf;

use clap::ValueHint;
use internet2::addr::ServiceAddr;
use lnpbp::chain::Chain;

#[cfg(any(target_os = "linux"))]
pub const MPP_NODE_DATA_DIR: &str = "~/.mpp_node/{chain}";
#[cfg(any(target_os = "freebsd", target_os = "openbsd", target_os = "netbsd"))]
pub const MPP_NODE_DATA_DIR: &str = "~/.mpp_node/{chain}";
#[cfg(target_os = "macos")]
pub const MPP_NODE_DATA_DIR: &str = "~/Library/Application Support/MPP Node/{chain}";
#[cfg(target_os = "windows")]
pub const MPP_NODE_DATA_DIR: &str = "~\\AppData\\Local\\MPP Node\\{chain}";
#[cfg(target_os = "ios")]
pub const MPP_NODE_DATA_DIR: &str = "~/Documents/{chain}";
#[cfg(target_os = "android")]
pub const MPP_NODE_DATA_DIR: &str = "./{chain}";

pub const MPP_NODE_CTL_SOCKET: &str = "{data_dir}/ctl";
pub const MPP_NODE_RPC_SOCKET: &str = "{data_dir}/rpc";

/// Shared options used by different binaries
#[derive(Parser, Clone, PartialEq, Eq, Debug)]
pub struct Opts {
    /// Data directory path
    ///
    /// Path to the directory that contains MPP Node data, and where ZMQ RPC
    /// socket files are located
    #[clap(
        short,
        long,
        global = true,
        default_value = MPP_NODE_DATA_DIR,
        env = "MPP_NODE_DATA_DIR",
        value_hint = ValueHint::DirPath
    )]
    pub data_dir: PathBuf,

    /// Set verbosity level
    ///
    /// Can be used multiple times to increase verbosity
    #[clap(short, long, global = true, parse(from_occurrences))]
    pub verbose: u8,

    /// ZMQ socket name/address for daemon control interface
    ///
    /// Internal interface for control RPC protocol communications. Defaults
    /// to `ctl` file inside `--data-dir` directory.
    #[clap(
        short = 'x',
        long,
        global = true,
        env = "MPP_NODE_CTL_SOCKET",
        value_hint = ValueHint::FilePath,
        default_value = MPP_NODE_CTL_SOCKET
    )]
    pub ctl_socket: ServiceAddr,

    /// ZMQ socket name/address for client RPC interface
    ///
    /// Defaults to `rpc` file inside `--data-dir` directory.
    #[clap(
        short = 'R',
        long,
        global = true,
        env = "MPP_NODE_RPC_SOCKET",
        value_hint = ValueHint::FilePath,
        default_value = MPP_NODE_RPC_SOCKET
    )]
    pub rpc_socket: ServiceAddr,

    /// Blockchain to use
    #[clap(
        short = 'n',
        long,
        global = true,
        alias = "network",
        default_value = "signet",
        env = "MPP_NODE_NETWORK"
    )]
    pub chain: Chain,
}

impl Opts {
    pub fn process(&mut self) {
        self.data_dir = PathBuf::from(
            shellexpand::tilde(
                &self
                    .data_dir
                    .display()
                    .to_string()
                    .replace("{chain}", &self.chain.to_string()),
            )
            .to_string(),
        );

        let me = self.clone();
        let _ = fs::create_dir_all(&self.data_dir);
        for endpoint in [&mut self.ctl_socket, &mut self.rpc_socket] {
            if let ServiceAddr::Ipc(path) = endpoint {
                me.process_dir(path);
            }
        }
    }

    pub fn process_dir(&self, path: &mut String) {
        *path = path.replace("{data_dir}", &self.data_dir.display().to_string());
        *path = shellexpand::tilde(path).to_string();
    }
}
