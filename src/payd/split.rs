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

//! Splitting a payment amount into HTLC parts over local channels.
//!
//! The splitter is a pure function: the only entropy source is the
//! caller-provided seed, so production and tests run the same code path.

use std::cmp;

use bitcoin::secp256k1::rand::rngs::StdRng;
use bitcoin::secp256k1::rand::seq::SliceRandom;
use bitcoin::secp256k1::rand::SeedableRng;
use lnp::router::gossip::DirectionalInfo;

use crate::bus::{FinalPayload, NetworkStats, RoutePrefix, SendPart, UsableBalance};
use crate::rpc::{RouteParams, SendPayment, DEFAULT_MIN_FINAL_CLTV_EXPIRY};

const MSAT_IN_SAT: u64 = 1000;
const MILLIONTHS: u64 = 1_000_000;

/// Computes the absolute CLTV expiry used in the final payload of every part:
/// the next block plus the largest of the requested and the invoice-required
/// final expiry delta.
pub fn final_expiry(request: &SendPayment, current_height: u32) -> u32 {
    let invoice_delta = request
        .invoice
        .as_ref()
        .and_then(|invoice| invoice.min_final_cltv_delta)
        .unwrap_or(DEFAULT_MIN_FINAL_CLTV_EXPIRY);
    current_height + 1 + cmp::max(request.min_final_cltv_delta, invoice_delta) as u32
}

/// First-hop forwarding fee for sending `amount_msat` over a channel with the
/// given update.
fn first_hop_fee(update: &DirectionalInfo, amount_msat: u64) -> u64 {
    update.fee_base_msat as u64
        + amount_msat.saturating_mul(update.fee_proportional_millionths as u64) / MILLIONTHS
}

/// Largest fee tolerated for a part of `amount_msat`.
fn fee_budget(params: &RouteParams, amount_msat: u64) -> u64 {
    params.max_fee_base_msat
        + amount_msat.saturating_mul(params.max_fee_proportional_millionths) / MILLIONTHS
}

/// Per-channel allocation state during a single split round.
struct Candidate<'a> {
    balance: &'a UsableBalance,
    /// Amount plus fees already allocated to this channel by the round
    spent_msat: u64,
    /// Capacity before any allocation, used for the deterministic ordering
    available_msat: u64,
}

impl<'a> Candidate<'a> {
    fn new(balance: &'a UsableBalance, params: &RouteParams) -> Self {
        let mut candidate = Candidate { balance, spent_msat: 0, available_msat: 0 };
        candidate.available_msat = candidate.capacity(params);
        candidate
    }

    fn htlc_minimum(&self) -> u64 { cmp::max(self.balance.update.htlc_minimum_msat, 1) }

    /// Largest additional part amount the channel can carry: bounded by the
    /// HTLC maximum, by the unallocated sendable balance net of first-hop
    /// fees, and by the per-part fee budget when the channel charges more
    /// than the budgeted proportional fee.
    fn capacity(&self, params: &RouteParams) -> u64 {
        let update = &self.balance.update;
        let unspent = self.balance.sendable_msat.saturating_sub(self.spent_msat);
        // solves x + fee_base + x * fee_prop / 1e6 <= unspent for x
        let mut cap = unspent
            .saturating_sub(update.fee_base_msat as u64)
            .saturating_mul(MILLIONTHS)
            / (MILLIONTHS + update.fee_proportional_millionths as u64);
        cap = cmp::min(cap, update.htlc_maximum_msat);
        let fee_prop = update.fee_proportional_millionths as u64;
        if fee_prop > params.max_fee_proportional_millionths {
            // solves fee_base + x * fee_prop / 1e6 <= budget(x) for x
            let base_headroom =
                params.max_fee_base_msat.saturating_sub(update.fee_base_msat as u64);
            cap = cmp::min(
                cap,
                base_headroom.saturating_mul(MILLIONTHS)
                    / (fee_prop - params.max_fee_proportional_millionths),
            );
        }
        cap
    }

    /// A channel is usable only if it can carry its minimal fragment within
    /// the per-part fee budget.
    fn eligible(&self, params: &RouteParams) -> bool {
        let min_fragment = self.htlc_minimum();
        self.available_msat >= min_fragment
            && first_hop_fee(&self.balance.update, min_fragment)
                <= fee_budget(params, min_fragment)
    }

    fn book(&mut self, amount_msat: u64) {
        self.spent_msat += amount_msat + first_hop_fee(&self.balance.update, amount_msat);
    }

    /// Whether an already-built part of `current_msat` on this channel can
    /// grow by `delta_msat` without violating channel bounds or the fee
    /// budget. Growing adds no new base fee: the part stays a single HTLC.
    fn can_absorb(&self, current_msat: u64, delta_msat: u64, params: &RouteParams) -> bool {
        let update = &self.balance.update;
        let total = current_msat + delta_msat;
        let extra_fee =
            delta_msat.saturating_mul(update.fee_proportional_millionths as u64) / MILLIONTHS;
        total <= update.htlc_maximum_msat
            && delta_msat + extra_fee
                <= self.balance.sendable_msat.saturating_sub(self.spent_msat)
            && first_hop_fee(update, total) <= fee_budget(params, total)
    }

    fn absorb(&mut self, delta_msat: u64) {
        let update = &self.balance.update;
        self.spent_msat += delta_msat
            + delta_msat.saturating_mul(update.fee_proportional_millionths as u64) / MILLIONTHS;
    }
}

/// Splits `amount_msat` into a set of child payment descriptors over the
/// provided channel balances.
///
/// Returns the uncovered residue and the produced descriptors; the descriptor
/// amounts sum to `amount_msat` minus the residue. A zero residue means the
/// split fully succeeded.
///
/// When the recipient is a direct peer only the channels to it are eligible
/// and each carries a single part filling its balance. Otherwise parts are
/// sized to the 75th percentile of remote channel capacities so they have the
/// best chance of onward routing, and a single channel may carry several
/// parts.
pub fn split(
    amount_msat: u64,
    balances: &[UsableBalance],
    network_stats: Option<&NetworkStats>,
    request: &SendPayment,
    current_height: u32,
    seed: u64,
) -> (u64, Vec<SendPart>) {
    let params = request.route_params.clone().unwrap_or_default();
    let payment_secret =
        request.invoice.as_ref().map(|invoice| invoice.payment_secret).unwrap_or_default();
    let cltv_expiry = final_expiry(request, current_height);

    let direct: Vec<&UsableBalance> =
        balances.iter().filter(|balance| balance.remote_node == request.recipient).collect();
    let is_direct = !direct.is_empty();
    let pool: Vec<&UsableBalance> =
        if is_direct { direct } else { balances.iter().collect() };

    let fragment_msat = if is_direct {
        u64::MAX
    } else {
        network_stats
            .map(|stats| stats.capacity_p75_sat.saturating_mul(MSAT_IN_SAT))
            .filter(|fragment| *fragment > 0)
            .unwrap_or(u64::MAX)
    };

    let mut candidates: Vec<Candidate> = pool
        .into_iter()
        .map(|balance| Candidate::new(balance, &params))
        .filter(|candidate| candidate.eligible(&params))
        .collect();

    if params.randomize {
        candidates.shuffle(&mut StdRng::seed_from_u64(seed));
    } else {
        candidates.sort_by(|a, b| {
            b.available_msat
                .cmp(&a.available_msat)
                .then_with(|| a.balance.channel_id.cmp(&b.balance.channel_id))
        });
    }

    let mut remaining = amount_msat;
    let mut parts: Vec<(usize, SendPart)> = vec![];

    for index in 0..candidates.len() {
        if remaining == 0 {
            break;
        }
        let min_fragment = candidates[index].htlc_minimum();
        loop {
            let capacity = candidates[index].capacity(&params);
            let part_amount = cmp::min(cmp::min(remaining, capacity), fragment_msat);
            if part_amount < min_fragment {
                break;
            }
            candidates[index].book(part_amount);
            parts.push((
                index,
                part(request, candidates[index].balance, part_amount, cltv_expiry, payment_secret),
            ));
            remaining -= part_amount;
            if remaining == 0 || is_direct {
                break;
            }
        }
    }

    // A residue below the HTLC minimum of every remaining channel can still
    // ride with the last produced part if its channel has room for it.
    if remaining > 0 {
        if let Some((index, last)) = parts.last_mut() {
            let candidate = &mut candidates[*index];
            if candidate.can_absorb(last.final_payload.amount_msat, remaining, &params) {
                candidate.absorb(remaining);
                last.final_payload.amount_msat += remaining;
                remaining = 0;
            }
        }
    }

    debug_assert_eq!(
        amount_msat - remaining,
        parts.iter().map(|(_, part)| part.final_payload.amount_msat).sum::<u64>(),
        "split must account for every millisatoshi of the requested amount"
    );

    (remaining, parts.into_iter().map(|(_, part)| part).collect())
}

fn part(
    request: &SendPayment,
    balance: &UsableBalance,
    amount_msat: u64,
    cltv_expiry: u32,
    payment_secret: amplify::Slice32,
) -> SendPart {
    SendPart {
        payment_hash: request.payment_hash,
        target: request.recipient,
        final_payload: FinalPayload {
            amount_msat,
            total_msat: request.amount_msat,
            cltv_expiry,
            payment_secret,
        },
        max_attempts: request.max_attempts,
        route_prefix: RoutePrefix {
            remote_node: balance.remote_node,
            channel_id: balance.channel_id,
            short_channel_id: balance.short_channel_id,
            update: balance.update,
        },
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::str::FromStr;

    use amplify::hex::FromHex;
    use amplify::Slice32;
    use bitcoin::secp256k1::rand::rngs::StdRng;
    use bitcoin::secp256k1::rand::{Rng, SeedableRng};
    use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
    use internet2::addr::NodeId;
    use lnp::p2p::bolt::{ChannelId, ShortChannelId};

    use super::*;
    use crate::rpc::{InvoiceFeatures, InvoiceInfo};

    pub fn node(index: u8) -> NodeId {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[index; 32]).expect("index must be non-zero");
        NodeId::from(PublicKey::from_secret_key(&secp, &sk))
    }

    pub fn channel(index: u32) -> ChannelId {
        ChannelId::from_hex(&format!("{:064x}", index)).expect("valid 32-byte hex")
    }

    pub fn short_channel(index: u32) -> ShortChannelId {
        ShortChannelId::from_str(&format!("{}x{}x0", 600_000 + index, index))
            .expect("valid short channel id")
    }

    pub fn balance_with(
        index: u32,
        remote_node: NodeId,
        sendable_msat: u64,
        htlc_minimum_msat: u64,
        htlc_maximum_msat: u64,
        fee_base_msat: u32,
        fee_proportional_millionths: u32,
    ) -> UsableBalance {
        UsableBalance {
            remote_node,
            channel_id: channel(index),
            short_channel_id: short_channel(index),
            sendable_msat,
            in_flight_msat: 0,
            announced: true,
            update: DirectionalInfo {
                timestamp: 0,
                message_flags: 1,
                channel_flags: 0,
                cltv_expiry_delta: 40,
                htlc_minimum_msat,
                fee_base_msat,
                fee_proportional_millionths,
                htlc_maximum_msat,
            },
        }
    }

    pub fn balance(index: u32, remote_node: NodeId, sendable_msat: u64) -> UsableBalance {
        balance_with(index, remote_node, sendable_msat, 1, u64::MAX, 0, 0)
    }

    pub fn stats(p75_sat: u64) -> NetworkStats {
        NetworkStats {
            channel_count: 42,
            capacity_median_sat: p75_sat / 2,
            capacity_p75_sat: p75_sat,
            capacity_p90_sat: p75_sat * 2,
            capacity_p99_sat: p75_sat * 4,
        }
    }

    pub fn request(amount_msat: u64, recipient: NodeId) -> SendPayment {
        SendPayment {
            amount_msat,
            payment_hash: Slice32::from([0xAA; 32]).into(),
            recipient,
            max_attempts: 3,
            min_final_cltv_delta: 12,
            invoice: Some(InvoiceInfo {
                payment_secret: Slice32::from([0xBB; 32]),
                min_final_cltv_delta: None,
                features: InvoiceFeatures { basic_mpp: true },
            }),
            route_params: None,
        }
    }

    fn amounts(parts: &[SendPart]) -> Vec<u64> {
        parts.iter().map(|part| part.final_payload.amount_msat).collect()
    }

    #[test]
    fn direct_peer_two_channels() {
        // Direct payment fills per-channel balances, bounded by htlc_maximum
        let peer = node(2);
        let balances = vec![
            balance_with(1, peer, 1_000_000, 1, 1_000_000, 0, 0),
            balance_with(2, peer, 1_500_000, 1, 1_000_000, 0, 0),
        ];
        let request = request(2_000_000, peer);
        let (remaining, parts) = split(2_000_000, &balances, None, &request, 600_000, 0);

        assert_eq!(remaining, 0);
        assert_eq!(amounts(&parts), vec![1_000_000, 1_000_000]);
        for part in &parts {
            assert_eq!(part.final_payload.total_msat, 2_000_000);
            assert_eq!(part.final_payload.cltv_expiry, 600_000 + 1 + 12);
            assert_eq!(part.final_payload.payment_secret, Slice32::from([0xBB; 32]));
            assert_eq!(part.target, peer);
        }
        // both local channels are used
        assert_ne!(parts[0].route_prefix.channel_id, parts[1].route_prefix.channel_id);
    }

    #[test]
    fn direct_peer_ignores_network_stats() {
        let peer = node(2);
        let balances = vec![balance(1, peer, 5_000_000)];
        let request = request(3_000_000, peer);
        // Tiny remote fragments must not fragment a direct payment
        let (remaining, parts) =
            split(3_000_000, &balances, Some(&stats(10)), &request, 600_000, 0);

        assert_eq!(remaining, 0);
        assert_eq!(amounts(&parts), vec![3_000_000]);
    }

    #[test]
    fn remote_peer_fragments_to_percentile() {
        // 1000 sat p75 => 1_000_000 msat fragments
        let recipient = node(9);
        let balances = vec![
            balance(1, node(2), 2_500_000),
            balance(2, node(3), 1_200_000),
            balance(3, node(4), 800_000),
        ];
        let request = request(3_200_000, recipient);
        let (remaining, parts) =
            split(3_200_000, &balances, Some(&stats(1_000)), &request, 600_000, 0);

        assert_eq!(remaining, 0);
        assert_eq!(amounts(&parts).iter().sum::<u64>(), 3_200_000);
        assert!(parts.len() >= 3 && parts.len() < 10, "got {} parts", parts.len());
        assert!(parts.iter().all(|part| part.final_payload.amount_msat <= 1_000_000));
        assert!(parts.iter().all(|part| part.final_payload.total_msat == 3_200_000));
        assert!(parts.iter().all(|part| part.max_attempts == 3));
        assert!(parts.iter().all(|part| part.final_payload.cltv_expiry == 600_000 + 1 + 12));
    }

    #[test]
    fn underfunded_returns_residue() {
        let recipient = node(9);
        // aggregate sendable of 2_900_000 msat cannot cover the request;
        // htlc_maximum additionally forces a multi-part allocation
        let balances = vec![
            balance_with(1, node(2), 1_500_000, 1, 900_000, 0, 0),
            balance_with(2, node(3), 1_400_000, 1, 900_000, 0, 0),
        ];
        let request = request(3_000_000, recipient);
        let (remaining, parts) =
            split(3_000_000, &balances, Some(&stats(1_000)), &request, 600_000, 0);

        assert_eq!(remaining, 100_000);
        assert!(parts.len() >= 3);
        assert_eq!(
            amounts(&parts).iter().sum::<u64>() + remaining,
            3_000_000,
            "residue and parts must cover the request"
        );
    }

    #[test]
    fn deterministic_without_randomization() {
        let recipient = node(9);
        let balances = vec![
            balance(1, node(2), 2_500_000),
            balance(2, node(3), 1_200_000),
            balance(3, node(4), 800_000),
        ];
        let request = request(3_000_000, recipient);
        let (_, first) = split(3_000_000, &balances, Some(&stats(700)), &request, 600_000, 1);
        let (_, second) = split(3_000_000, &balances, Some(&stats(700)), &request, 600_000, 2);
        assert_eq!(first, second, "different seeds must not matter without randomization");
    }

    #[test]
    fn randomized_is_seed_stable() {
        let recipient = node(9);
        let balances = vec![
            balance(1, node(2), 2_500_000),
            balance(2, node(3), 1_200_000),
            balance(3, node(4), 800_000),
        ];
        let mut request = request(3_000_000, recipient);
        request.route_params = Some(RouteParams { randomize: true, ..Default::default() });
        let (remaining, first) =
            split(3_000_000, &balances, Some(&stats(700)), &request, 600_000, 7);
        let (_, second) = split(3_000_000, &balances, Some(&stats(700)), &request, 600_000, 7);
        assert_eq!(remaining, 0);
        assert_eq!(first, second, "same seed must reproduce the same split");
    }

    #[test]
    fn channel_with_excessive_fees_is_rejected() {
        let recipient = node(9);
        let expensive = balance_with(1, node(2), 5_000_000, 1_000, u64::MAX, 100_000, 0);
        let cheap = balance_with(2, node(3), 5_000_000, 1_000, u64::MAX, 0, 0);
        let mut request = request(2_000_000, recipient);
        request.route_params = Some(RouteParams {
            max_fee_base_msat: 1_000,
            max_fee_proportional_millionths: 0,
            ..Default::default()
        });
        let (remaining, parts) = split(
            2_000_000,
            &[expensive, cheap],
            Some(&stats(10_000)),
            &request,
            600_000,
            0,
        );

        assert_eq!(remaining, 0);
        assert!(parts.iter().all(|part| part.route_prefix.channel_id == channel(2)));
    }

    #[test]
    fn fees_are_deducted_from_sendable() {
        let recipient = node(9);
        // 1% proportional fee; a 1_000_000 msat balance can't carry a full
        // 1_000_000 msat part
        let balances = vec![balance_with(1, node(2), 1_000_000, 1, u64::MAX, 0, 10_000)];
        let request = request(1_000_000, recipient);
        let (remaining, parts) =
            split(1_000_000, &balances, Some(&stats(10_000)), &request, 600_000, 0);

        assert!(remaining > 0);
        let sent = parts[0].final_payload.amount_msat;
        let fee = first_hop_fee(&balances[0].update, sent);
        assert!(sent + fee <= 1_000_000, "amount plus fee must fit the balance");
    }

    #[test]
    fn tail_below_htlc_minimum_merges_into_last_part() {
        let recipient = node(9);
        let balances = vec![
            balance_with(1, node(2), 2_000_000, 10_000, u64::MAX, 0, 0),
            balance_with(2, node(3), 2_000_000, 10_000, u64::MAX, 0, 0),
        ];
        let request = request(1_005_000, recipient);
        // fragment of 1_000_000 msat leaves a 5_000 msat tail below the
        // minimum of every channel
        let (remaining, parts) =
            split(1_005_000, &balances, Some(&stats(1_000)), &request, 600_000, 0);

        assert_eq!(remaining, 0);
        assert_eq!(amounts(&parts).iter().sum::<u64>(), 1_005_000);
        assert!(parts.iter().all(|part| part.final_payload.amount_msat >= 10_000));
    }

    #[test]
    fn respects_htlc_bounds_and_budget() {
        let recipient = node(9);
        let mut rng = StdRng::seed_from_u64(1234);
        for round in 0..200u64 {
            let balances: Vec<UsableBalance> = (0..6)
                .map(|index| {
                    balance_with(
                        index + 1,
                        node((index % 4 + 2) as u8),
                        rng.gen_range(100_000, 2_000_000),
                        rng.gen_range(1, 1_000),
                        rng.gen_range(500_000, 2_000_000),
                        rng.gen_range(0, 1_000),
                        rng.gen_range(0, 1_000),
                    )
                })
                .collect();
            let amount = rng.gen_range(1_000, 3_000_000);
            let request = request(amount, recipient);
            let (remaining, parts) =
                split(amount, &balances, Some(&stats(rng.gen_range(400, 2_000))), &request, 600_000, round);

            assert_eq!(
                amounts(&parts).iter().sum::<u64>() + remaining,
                amount,
                "round {}: split must conserve the amount",
                round
            );
            for part in &parts {
                let update = &part.route_prefix.update;
                assert!(part.final_payload.amount_msat >= update.htlc_minimum_msat);
                assert!(part.final_payload.amount_msat <= update.htlc_maximum_msat);
            }
        }
    }

    #[test]
    fn fuzzed_pool_always_covers_request() {
        // Randomized totals against a fixed 6_500_000 msat pool with
        // randomized remote capacity and fee parameters must always be fully
        // covered.
        let recipient = node(9);
        let mut rng = StdRng::seed_from_u64(0xF00D);
        for round in 0..500u64 {
            let balances = vec![
                balance(1, node(2), 2_000_000),
                balance(2, node(3), 1_500_000),
                balance(3, node(4), 1_000_000),
                balance(4, node(5), 1_000_000),
                balance(5, node(2), 600_000),
                balance(6, node(3), 400_000),
            ];
            let amount = rng.gen_range(1_000, 3_500_001);
            let p75_sat = rng.gen_range(400, 2_001);
            let mut request = request(amount, recipient);
            request.route_params = Some(RouteParams {
                randomize: round % 2 == 0,
                max_fee_base_msat: rng.gen_range(1_000, 50_000),
                max_fee_proportional_millionths: rng.gen_range(1_000, 100_000),
                ..Default::default()
            });
            let (remaining, parts) =
                split(amount, &balances, Some(&stats(p75_sat)), &request, 600_000, round);

            assert_eq!(remaining, 0, "round {}: pool must cover {} msat", round, amount);
            assert!(!parts.is_empty());
            assert_eq!(amounts(&parts).iter().sum::<u64>(), amount);
        }
    }
}
