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

use std::fmt::{self, Display, Formatter};

use amplify::{Slice32, Wrapper};
use internet2::addr::NodeId;
use lnp::p2p::bolt::ShortChannelId;
use microservices::rpc_connection;
#[cfg(feature = "serde")]
use serde_with::DisplayFromStr;
use wallet::hlc::{HashLock, HashPreimage};

use crate::PartId;

/// Default value for the `min_final_cltv_expiry` invoice field, in blocks,
/// used when the invoice does not provide one (BOLT-11 requirement).
pub const DEFAULT_MIN_FINAL_CLTV_EXPIRY: u16 = 9;

/// Default part fee budget base when the request carries no route parameters
/// (21 satoshi).
pub const DEFAULT_MAX_FEE_BASE_MSAT: u64 = 21_000;

/// Default part fee budget in millionths of the part amount when the request
/// carries no route parameters (3%).
pub const DEFAULT_MAX_FEE_PROPORTIONAL_MILLIONTHS: u64 = 30_000;

/// Default limit on the number of hops in a single payment route.
pub const DEFAULT_MAX_ROUTE_LENGTH: u8 = 6;

/// Default limit on the accumulated CLTV delta of a single payment route,
/// in blocks (one week).
pub const DEFAULT_MAX_CLTV_DELTA: u16 = 1008;

/// We need this wrapper type to be compatible with MPP Node having multiple
/// message buses
#[derive(Clone, Debug, Display, From, Api)]
#[api(encoding = "strict")]
#[non_exhaustive]
pub(crate) enum BusMsg {
    #[api(type = 4)]
    #[display(inner)]
    #[from]
    Rpc(RpcMsg),
}

impl rpc_connection::Request for BusMsg {}

/// RPC API requests between MPP Node daemons and clients.
#[derive(Clone, Debug, Display, From)]
#[derive(NetworkEncode, NetworkDecode)]
#[non_exhaustive]
pub enum RpcMsg {
    /// Requests coordination of a new multi-part payment.
    #[display("send_payment({0})")]
    SendPayment(SendPayment),

    /// Subscribes the client to terminal payment events of all payments
    /// coordinated by the node.
    #[display("subscribe()")]
    Subscribe,

    #[display("unsubscribe()")]
    Unsubscribe,

    // Responses to CLI
    // ----------------
    #[display("progress(\"{0}\")")]
    #[from]
    Progress(String),

    #[display("success({0})")]
    Success(OptionDetails),

    #[display("failure({0:#})")]
    #[from]
    Failure(Failure),

    /// Terminal event: the payment succeeded and the payment preimage was
    /// obtained.
    #[display("payment_sent({0})")]
    #[from]
    PaymentSent(PaymentSent),

    /// Terminal event: the payment can't be completed.
    #[display("payment_failed({0})")]
    #[from]
    PaymentFailed(PaymentFailed),
}

/// Request to coordinate a multi-part payment, originating from a client.
///
/// The caller is responsible for invoice validation; the request carries
/// already-extracted invoice data.
#[derive(Clone, PartialEq, Eq, Debug, Display, NetworkEncode, NetworkDecode)]
#[display("{amount_msat} msat to {recipient} locked by {payment_hash}")]
pub struct SendPayment {
    /// Total amount to deliver to the recipient, in millisatoshis
    pub amount_msat: u64,

    /// The hash lock shared by all HTLC parts of the payment
    pub payment_hash: HashLock,

    /// Recipient node id
    pub recipient: NodeId,

    /// Global budget of child payment attempts across the whole lifecycle;
    /// must be at least 1
    pub max_attempts: u8,

    /// Minimal CLTV expiry delta to use at the recipient, in blocks
    pub min_final_cltv_delta: u16,

    /// Data extracted from a BOLT-11 invoice, if the payment pays one
    pub invoice: Option<InvoiceInfo>,

    /// Custom route parameters overriding node defaults
    pub route_params: Option<RouteParams>,
}

/// Invoice data relevant for payment coordination
#[derive(Clone, PartialEq, Eq, Debug, Display, NetworkEncode, NetworkDecode)]
#[display("invoice(secret {payment_secret}, ...)")]
pub struct InvoiceInfo {
    /// Payment secret from the invoice; included into the final payload of
    /// every part so the recipient can assemble the HTLC set
    pub payment_secret: Slice32,

    /// Minimal CLTV expiry required by the invoice, if specified
    pub min_final_cltv_delta: Option<u16>,

    /// Features advertised by the invoice
    pub features: InvoiceFeatures,
}

/// Invoice feature flags relevant for payment coordination
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, Default)]
#[derive(NetworkEncode, NetworkDecode)]
#[display("basic_mpp={basic_mpp}")]
pub struct InvoiceFeatures {
    /// Whether the recipient supports receiving multiple HTLC parts under a
    /// single payment hash
    pub basic_mpp: bool,
}

/// Parameters bounding route construction and fees for each payment part
#[derive(Clone, PartialEq, Eq, Debug, Display, NetworkEncode, NetworkDecode)]
#[display("route_params(fee {max_fee_base_msat} msat + {max_fee_proportional_millionths}ppm, ...)")]
pub struct RouteParams {
    /// Randomize channel selection with each split
    pub randomize: bool,

    /// Base component of the fee budget for a single part, in millisatoshis
    pub max_fee_base_msat: u64,

    /// Proportional component of the fee budget for a single part, in
    /// millionths of the part amount
    pub max_fee_proportional_millionths: u64,

    /// Maximal number of hops in a route
    pub max_route_length: u8,

    /// Maximal accumulated CLTV expiry delta of a route, in blocks
    pub max_cltv_delta: u16,

    /// Assisted routes from invoice routing hints
    pub assisted_routes: Vec<AssistedRoute>,
}

impl Default for RouteParams {
    fn default() -> Self {
        RouteParams {
            randomize: false,
            max_fee_base_msat: DEFAULT_MAX_FEE_BASE_MSAT,
            max_fee_proportional_millionths: DEFAULT_MAX_FEE_PROPORTIONAL_MILLIONTHS,
            max_route_length: DEFAULT_MAX_ROUTE_LENGTH,
            max_cltv_delta: DEFAULT_MAX_CLTV_DELTA,
            assisted_routes: vec![],
        }
    }
}

/// Sequence of non-public hops completing a route towards the recipient,
/// as announced by an invoice routing hint.
#[derive(Wrapper, Clone, PartialEq, Eq, Debug, From, Default)]
#[derive(NetworkEncode, NetworkDecode)]
pub struct AssistedRoute(Vec<RouteHint>);

impl Display for AssistedRoute {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for hint in &self.0 {
            if !first {
                f.write_str(" -> ")?;
            }
            Display::fmt(hint, f)?;
            first = false;
        }
        Ok(())
    }
}

/// Single hop of an assisted route
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, NetworkEncode, NetworkDecode)]
#[display("{node_id}@{short_channel_id}")]
pub struct RouteHint {
    /// Node at the source of the hinted channel
    pub node_id: NodeId,

    /// Hinted channel
    pub short_channel_id: ShortChannelId,

    /// Base forwarding fee of the hinted channel, in millisatoshis
    pub fee_base_msat: u32,

    /// Proportional forwarding fee of the hinted channel, in millionths
    pub fee_proportional_millionths: u32,

    /// CLTV expiry delta of the hinted channel, in blocks
    pub cltv_expiry_delta: u16,
}

/// Terminal event for a successfully completed payment.
///
/// Emitted exactly once per payment lifecycle, after all outstanding child
/// attempts have reported, so the aggregate fee is final.
#[cfg_attr(feature = "serde", serde_as)]
#[derive(Clone, PartialEq, Eq, Debug, Display, NetworkEncode, NetworkDecode)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("{payment_hash}: {amount_msat} msat delivered with {fee_msat} msat paid in fees")]
pub struct PaymentSent {
    /// Hash lock of the payment
    #[cfg_attr(feature = "serde", serde_as(as = "DisplayFromStr"))]
    pub payment_hash: HashLock,

    /// Proof of payment matching the hash lock
    #[cfg_attr(feature = "serde", serde_as(as = "DisplayFromStr"))]
    pub preimage: HashPreimage,

    /// Total amount delivered to the recipient, in millisatoshis
    pub amount_msat: u64,

    /// Sum of fees paid by all successful parts, in millisatoshis
    pub fee_msat: u64,

    /// Parts which the recipient has fulfilled, in reporting order
    pub parts: Vec<PartialPayment>,
}

/// Terminal event for a payment which can't be completed.
#[cfg_attr(feature = "serde", serde_as)]
#[derive(Clone, PartialEq, Eq, Debug, Display, NetworkEncode, NetworkDecode)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("{payment_hash}: payment failed")]
pub struct PaymentFailed {
    /// Hash lock of the payment
    #[cfg_attr(feature = "serde", serde_as(as = "DisplayFromStr"))]
    pub payment_hash: HashLock,

    /// All per-child failures, in reporting order
    pub failures: Vec<PaymentFailure>,
}

/// Successfully resolved child payment attempt
#[cfg_attr(feature = "serde", serde_as)]
#[derive(Clone, PartialEq, Eq, Debug, Display, NetworkEncode, NetworkDecode)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("part {part_id} of {amount_msat} msat ({fee_msat} msat fees) via {first_hop}")]
pub struct PartialPayment {
    /// Id of the child attempt which delivered this part
    #[cfg_attr(feature = "serde", serde_as(as = "DisplayFromStr"))]
    pub part_id: PartId,

    /// Amount delivered by this part, in millisatoshis
    pub amount_msat: u64,

    /// Fees paid by this part, in millisatoshis
    pub fee_msat: u64,

    /// Local channel which carried the first hop of the part
    #[cfg_attr(feature = "serde", serde_as(as = "DisplayFromStr"))]
    pub first_hop: ShortChannelId,

    /// Route taken by the part, if known
    #[cfg_attr(feature = "serde", serde_as(as = "Option<Vec<DisplayFromStr>>"))]
    pub route: Option<Vec<NodeId>>,
}

/// Record of a single child payment attempt failure.
///
/// Records are accumulated in reporting order and never deduplicated.
#[cfg_attr(feature = "serde", serde_as)]
#[derive(Clone, PartialEq, Eq, Debug, Display, From, NetworkEncode, NetworkDecode)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum PaymentFailure {
    /// Failure originated on this node (or inside a child worker) and
    /// carries no onion data.
    #[display("local failure: {0}")]
    #[from]
    Local(LocalFailure),

    /// Failure reported by a remote node and successfully decrypted from the
    /// returned onion.
    #[display("remote failure: {failure}")]
    Remote {
        /// Route prefix travelled by the part before the failure
        #[cfg_attr(feature = "serde", serde_as(as = "Vec<DisplayFromStr>"))]
        route: Vec<NodeId>,

        /// Decrypted failure message
        failure: RemoteFailure,
    },

    /// Failure which could not be attributed or decrypted.
    #[display("unreadable remote failure")]
    Unreadable {
        /// Route prefix travelled by the part
        #[cfg_attr(feature = "serde", serde_as(as = "Vec<DisplayFromStr>"))]
        route: Vec<NodeId>,
    },
}

impl PaymentFailure {
    /// Detects the failure terminating the whole payment lifecycle: the
    /// recipient gave up on waiting for the remaining parts, so no retry can
    /// help.
    pub fn is_payment_timeout(&self) -> bool {
        matches!(self, PaymentFailure::Remote { failure: RemoteFailure::PaymentTimeout, .. })
    }

    /// Retryable failures are routed around by re-splitting the missing
    /// amount over fresh channel balances.
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentFailure::Local(local) => local.is_retryable(),
            PaymentFailure::Remote { failure, .. } => {
                !matches!(failure, RemoteFailure::PaymentTimeout)
            }
            PaymentFailure::Unreadable { .. } => true,
        }
    }
}

/// Locally-originated failure kinds.
///
/// The display text of these variants is the canonical wire representation;
/// match on the variants, never on the text.
#[derive(Clone, PartialEq, Eq, Debug, Display, NetworkEncode, NetworkDecode)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum LocalFailure {
    /// Aggregate usable balance can't cover the requested amount; reported
    /// from the initial split without spawning any children, or when a
    /// re-split can't cover the missing amount.
    #[display("balance is too low")]
    BalanceTooLow,

    /// The global attempt budget was exhausted by retries.
    #[display("payment attempts exhausted without success")]
    AttemptsExhausted,

    /// Any other local failure, e.g. a child worker timing out internally.
    #[display(inner)]
    Other(String),
}

impl LocalFailure {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LocalFailure::BalanceTooLow | LocalFailure::AttemptsExhausted)
    }
}

/// Failure messages decrypted from a returned onion, named after their
/// BOLT-4 counterparts.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, NetworkEncode, NetworkDecode)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[non_exhaustive]
pub enum RemoteFailure {
    /// The recipient did not receive the full payment amount within a
    /// reasonable time and gave up on the HTLC set. Fatal: aborts the
    /// lifecycle regardless of the remaining attempt budget.
    #[display("mpp_timeout")]
    PaymentTimeout,

    #[display("temporary_channel_failure")]
    TemporaryChannelFailure,

    #[display("temporary_node_failure")]
    TemporaryNodeFailure,

    #[display("fee_insufficient")]
    FeeInsufficient,

    #[display("amount_below_minimum")]
    AmountBelowMinimum,

    #[display("expiry_too_soon")]
    ExpiryTooSoon,

    #[display("unknown_next_peer")]
    UnknownNextPeer,

    #[display("incorrect_or_unknown_payment_details")]
    IncorrectOrUnknownPaymentDetails,
}

/// Information about server-side failure returned through RPC API
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
#[derive(NetworkEncode, NetworkDecode)]
#[display("{info}", alt = "Server returned failure #{code}: {info}")]
pub struct Failure {
    /// Failure code
    pub code: u16,

    /// Detailed information about the failure
    pub info: String,
}

impl Failure {
    pub fn into_microservice_failure(self) -> microservices::rpc::Failure {
        microservices::rpc::Failure { code: self.code, info: self.info }
    }
}

#[derive(Wrapper, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, From, Default)]
#[derive(NetworkEncode, NetworkDecode)]
pub struct OptionDetails(pub Option<String>);

impl Display for OptionDetails {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.as_inner() {
            None => Ok(()),
            Some(msg) => write!(f, "\"{}\"", msg),
        }
    }
}

impl OptionDetails {
    pub fn with(s: impl ToString) -> Self { Self(Some(s.to_string())) }

    pub fn new() -> Self { Self(None) }
}

impl From<String> for OptionDetails {
    fn from(s: String) -> Self { OptionDetails(Some(s)) }
}

impl From<&str> for OptionDetails {
    fn from(s: &str) -> Self { OptionDetails(Some(s.to_string())) }
}

impl From<crate::Error> for RpcMsg {
    fn from(err: crate::Error) -> Self { RpcMsg::Failure(Failure::from(&err)) }
}

impl From<&str> for RpcMsg {
    fn from(s: &str) -> Self { RpcMsg::Progress(s.to_owned()) }
}

impl<E: std::error::Error> From<&E> for Failure {
    fn from(err: &E) -> Self {
        Failure {
            code: 9000, // TODO: do code types
            info: err.to_string(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn local_failure_canonical_text() {
        assert_eq!(LocalFailure::BalanceTooLow.to_string(), "balance is too low");
        assert_eq!(
            LocalFailure::AttemptsExhausted.to_string(),
            "payment attempts exhausted without success"
        );
        assert_eq!(
            LocalFailure::Other(s!("first-hop channel went away")).to_string(),
            "first-hop channel went away"
        );
    }

    #[test]
    fn failure_retryability() {
        let timeout =
            PaymentFailure::Remote { route: vec![], failure: RemoteFailure::PaymentTimeout };
        assert!(timeout.is_payment_timeout());
        assert!(!timeout.is_retryable());

        let transient = PaymentFailure::Remote {
            route: vec![],
            failure: RemoteFailure::TemporaryChannelFailure,
        };
        assert!(!transient.is_payment_timeout());
        assert!(transient.is_retryable());

        assert!(PaymentFailure::Unreadable { route: vec![] }.is_retryable());
        assert!(!PaymentFailure::Local(LocalFailure::BalanceTooLow).is_retryable());
        assert!(!PaymentFailure::Local(LocalFailure::AttemptsExhausted).is_retryable());
        assert!(PaymentFailure::Local(LocalFailure::Other(s!("timed out"))).is_retryable());
    }

    #[test]
    fn route_params_defaults() {
        let params = RouteParams::default();
        assert!(!params.randomize);
        assert_eq!(params.max_fee_base_msat, DEFAULT_MAX_FEE_BASE_MSAT);
        assert_eq!(
            params.max_fee_proportional_millionths,
            DEFAULT_MAX_FEE_PROPORTIONAL_MILLIONTHS
        );
        assert!(params.assisted_routes.is_empty());
    }
}
