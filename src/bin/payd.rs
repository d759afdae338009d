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

#![recursion_limit = "256"]
// Coding conventions
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    dead_code,
    missing_docs
)]

//! Main executable for payd: microservice coordinating the lifecycle of
//! multi-part lightning payments.

#[macro_use]
extern crate log;

use clap::Parser;
use mpp_node::payd::{self, Opts};
use mpp_node::Config;

fn main() {
    println!("payd: multi-part payment coordination microservice");

    let mut opts = Opts::parse();
    trace!("Command-line arguments: {:?}", &opts);
    opts.process();
    trace!("Processed arguments: {:?}", &opts);

    env_logger::init();

    let config: Config = opts.shared.clone().into();
    trace!("Daemon configuration: {:?}", &config);
    debug!("CTL socket {}", &config.ctl_endpoint);
    debug!("RPC socket {}", &config.rpc_endpoint);

    debug!("Starting runtime ...");
    payd::run(config).expect("Error running payd runtime");

    unreachable!()
}
