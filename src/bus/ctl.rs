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

use amplify::Slice32;
use internet2::addr::NodeId;
use lnp::p2p::bolt::{ChannelId, ShortChannelId};
use lnp::router::gossip::DirectionalInfo;
use mpp_rpc::{PartId, PartialPayment, PaymentFailure};
use strict_encoding::{NetworkDecode, NetworkEncode};
use wallet::hlc::{HashLock, HashPreimage};

use crate::rpc::ServiceId;

/// RPC API requests over CTL message bus between MPP Node daemons.
#[derive(Clone, Debug, Display, From)]
#[derive(NetworkEncode, NetworkDecode)]
#[non_exhaustive]
pub enum CtlMsg {
    #[display("hello()")]
    Hello,

    // Network statistics API
    // ----------------------
    /// Requests remote channel capacity statistics for sizing the fragments
    /// of the given payment. Sent from payd to routed; the router computes
    /// the statistics on demand if it has no fresh value.
    #[display("get_network_stats({0})")]
    GetNetworkStats(HashLock),

    /// Network statistics response. An empty value means the router knows of
    /// no remote channels; the split then proceeds without a fragment-size
    /// hint.
    #[display("network_stats({0})")]
    NetworkStats(NetworkStatsReply),

    // Channel balance API
    // -------------------
    /// Requests a fresh snapshot of usable local channel balances for the
    /// given payment. Sent from payd to relayerd on each (re-)split so
    /// concurrent in-flight payments are accounted for.
    #[display("get_usable_balances({0})")]
    GetUsableBalances(HashLock),

    /// Usable balances response.
    #[display("usable_balances({0})")]
    UsableBalances(UsableBalancesReply),

    // Child payment API
    // -----------------
    /// Orders a child payment worker to attempt delivery of a single HTLC
    /// part along the provided route prefix extended by a router-computed
    /// suffix. Sent from payd to a newly instantiated partd.
    #[display("send_part({0})")]
    SendPart(SendPart),

    /// Terminal child worker success report. Sent from partd to payd exactly
    /// once per child attempt.
    #[display("part_sent({0})")]
    PartSent(PartSent),

    /// Terminal child worker failure report. Sent from partd to payd exactly
    /// once per child attempt.
    #[display("part_failed({0})")]
    PartFailed(PartFailed),

    // Chain tracking API
    // ------------------
    /// Reports a new chain tip height; used for computing the CLTV expiry of
    /// final payloads. Sent from watchd to payd.
    #[display("height_changed({0})")]
    HeightChanged(u32),

    // Responses
    // ---------
    /// Error returned back by response-reply type of daemons in case if the
    /// operation has failed.
    #[display("error({destination}, \"{error}\")")]
    Error { destination: ServiceId, request: String, error: String },

    /// Error returned if the destination service is offline
    #[display("esb_error({destination}, \"{error}\")")]
    EsbError { destination: ServiceId, error: String },
}

impl CtlMsg {
    pub fn with_error(
        destination: &ServiceId,
        message: &CtlMsg,
        err: &impl std::error::Error,
    ) -> CtlMsg {
        CtlMsg::Error {
            destination: destination.clone(),
            request: message.to_string(),
            error: err.to_string(),
        }
    }
}

/// Network statistics response correlated with the payment they were
/// requested for; one payd instance multiplexes many payment lifecycles over
/// a single router connection.
#[derive(Clone, PartialEq, Eq, Debug, Display, NetworkEncode, NetworkDecode)]
#[display("{payment_hash}, ...")]
pub struct NetworkStatsReply {
    /// Payment the statistics were requested for
    pub payment_hash: HashLock,

    /// Statistics value; `None` when the router knows of no remote channels
    pub stats: Option<NetworkStats>,
}

/// Distributional summary of remote channel capacities observed in network
/// gossip. Used by the splitter only as a hint for fragment sizing when the
/// recipient is not a direct peer.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, NetworkEncode, NetworkDecode)]
#[display("{channel_count} channels, p75 capacity {capacity_p75_sat} sat")]
pub struct NetworkStats {
    /// Number of remote channels the statistics are computed over
    pub channel_count: u32,

    /// Median channel capacity, in satoshis
    pub capacity_median_sat: u64,

    /// 75th percentile of channel capacity, in satoshis
    pub capacity_p75_sat: u64,

    /// 90th percentile of channel capacity, in satoshis
    pub capacity_p90_sat: u64,

    /// 99th percentile of channel capacity, in satoshis
    pub capacity_p99_sat: u64,
}

/// Usable balances response correlated with the payment they were requested
/// for.
#[derive(Clone, PartialEq, Eq, Debug, Display, NetworkEncode, NetworkDecode)]
#[display("{payment_hash}, ...")]
pub struct UsableBalancesReply {
    /// Payment the snapshot was requested for
    pub payment_hash: HashLock,

    /// Per-channel balance snapshot
    pub balances: Vec<UsableBalance>,
}

/// Snapshot of a single local channel balance usable for sending.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, NetworkEncode, NetworkDecode)]
#[display("{channel_id}@{remote_node}: {sendable_msat} msat sendable")]
pub struct UsableBalance {
    /// Channel counterparty
    pub remote_node: NodeId,

    /// Full channel id
    pub channel_id: ChannelId,

    /// Short channel id used in routes
    pub short_channel_id: ShortChannelId,

    /// Amount which can be sent over the channel right now, in millisatoshis
    pub sendable_msat: u64,

    /// Amount locked in outgoing HTLCs, in millisatoshis
    pub in_flight_msat: u64,

    /// Whether the channel is announced to the network
    pub announced: bool,

    /// Counterparty forwarding policy from the latest `channel_update`: fee
    /// schedule, CLTV delta and HTLC amount bounds
    pub update: DirectionalInfo,
}

/// Descriptor of a single child payment attempt sent to a child worker.
#[derive(Clone, PartialEq, Eq, Debug, Display, NetworkEncode, NetworkDecode)]
#[display("{payment_hash} to {target}, {final_payload}")]
pub struct SendPart {
    /// Hash lock shared by all parts of the payment
    pub payment_hash: HashLock,

    /// Final recipient of the payment
    pub target: NodeId,

    /// Onion payload for the recipient hop
    pub final_payload: FinalPayload,

    /// Attempt budget the worker may use internally for route construction
    pub max_attempts: u8,

    /// First hop dictated by the coordinator; the worker completes the rest
    /// of the route through the router
    pub route_prefix: RoutePrefix,
}

/// Recipient-hop payload fields of a part.
///
/// `total_msat` equals the original request amount on every part so the
/// recipient can associate arriving HTLCs into one set; `payment_secret` is
/// identical across all parts of one lifecycle.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, NetworkEncode, NetworkDecode)]
#[display("{amount_msat} of {total_msat} msat, expiry {cltv_expiry}")]
pub struct FinalPayload {
    /// Amount delivered by this part, in millisatoshis
    pub amount_msat: u64,

    /// Total amount of the payment the part belongs to, in millisatoshis
    pub total_msat: u64,

    /// Absolute CLTV expiry block height for the recipient hop
    pub cltv_expiry: u32,

    /// Payment secret from the invoice
    pub payment_secret: Slice32,
}

/// First hop of a part route: from this node to a specific peer via a
/// specific channel.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, NetworkEncode, NetworkDecode)]
#[display("{short_channel_id}@{remote_node}")]
pub struct RoutePrefix {
    /// Peer on the other side of the first-hop channel
    pub remote_node: NodeId,

    /// Full id of the first-hop channel
    pub channel_id: ChannelId,

    /// Short id of the first-hop channel
    pub short_channel_id: ShortChannelId,

    /// Forwarding policy of the first-hop channel used for fee accounting
    pub update: DirectionalInfo,
}

/// Success report of a child payment worker.
#[derive(Clone, PartialEq, Eq, Debug, Display, NetworkEncode, NetworkDecode)]
#[display("{part_id} fulfilled {payment_hash}")]
pub struct PartSent {
    /// Reporting child attempt
    pub part_id: PartId,

    /// Hash lock of the payment the part belongs to
    pub payment_hash: HashLock,

    /// Proof of payment revealed by the recipient
    pub preimage: HashPreimage,

    /// Resolved partial payments (normally a single one)
    pub parts: Vec<PartialPayment>,
}

/// Failure report of a child payment worker.
#[derive(Clone, PartialEq, Eq, Debug, Display, NetworkEncode, NetworkDecode)]
#[display("{part_id} failed {payment_hash}")]
pub struct PartFailed {
    /// Reporting child attempt
    pub part_id: PartId,

    /// Hash lock of the payment the part belongs to
    pub payment_hash: HashLock,

    /// Failure records accumulated by the worker, in occurrence order
    pub failures: Vec<PaymentFailure>,
}
