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
#![deny(non_upper_case_globals, non_camel_case_types, non_snake_case, unused_mut, unused_imports)]

//! MPP Node: a node coordinating multi-part lightning payments. Given a
//! request to pay a total amount to a recipient it splits the amount across
//! multiple concurrent HTLCs over different local channels, supervises each
//! child attempt, retries failures within a bounded attempt budget and emits
//! a single terminal success or failure event.

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate internet2;
#[macro_use]
extern crate log;
#[cfg(feature = "shell")]
#[macro_use]
extern crate clap;

#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate;

pub use mpp_rpc as rpc;

pub mod automata;
pub mod bus;
mod config;
mod error;
#[cfg(feature = "shell")]
pub mod opts;
pub mod payd;
mod service;

pub use config::Config;
pub use error::Error;
pub use service::{Endpoints, LogStyle, Responder, Service};
