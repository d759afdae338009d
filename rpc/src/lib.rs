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

//! RPC API for MPP Node: requests for coordinating multi-part payments,
//! terminal payment events and a client connecting to the node over ZMQ RPC
//! bus.

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate strict_encoding;
#[macro_use]
extern crate internet2;
#[macro_use]
extern crate log;

#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_with;

mod client;
mod error;
mod messages;
mod service_id;

pub use client::Client;
pub use error::Error;
pub(crate) use messages::BusMsg;
pub use messages::{
    AssistedRoute, Failure, InvoiceFeatures, InvoiceInfo, LocalFailure, OptionDetails,
    PartialPayment, PaymentFailed, PaymentFailure, PaymentSent, RemoteFailure, RouteHint,
    RouteParams, RpcMsg, SendPayment, DEFAULT_MAX_CLTV_DELTA, DEFAULT_MAX_FEE_BASE_MSAT,
    DEFAULT_MAX_FEE_PROPORTIONAL_MILLIONTHS, DEFAULT_MAX_ROUTE_LENGTH,
    DEFAULT_MIN_FINAL_CLTV_EXPIRY,
};
pub use service_id::{ClientId, PartId, ServiceId, ServiceName};

pub const MPP_NODE_RPC_ENDPOINT: &str = "0.0.0.0:62962";
