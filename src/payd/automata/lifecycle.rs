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

//! Workflow supervising the lifecycle of a single multi-part payment: from
//! the caller request through splitting, child part supervision and retries
//! to the single terminal success or failure event.
//!
//! State machine workflow:
//! ```ignore
//!         START
//!           |
//!           V
//!         STATS
//!           |
//!           V
//!        BALANCES
//!           |
//!           V
//!      IN_PROGRESS <------+
//!        |  |  |          |
//!        |  |  +-----> RETRYING
//!        |  |             |
//!        V  V             V
//! SUCCEEDED ABORTED <-----+
//!        |  |
//!        V  V
//!         DONE
//! ```

use std::collections::{BTreeMap, BTreeSet};

use wallet::hlc::{HashLock, HashPreimage};

use crate::automata::StateMachine;
use crate::bus::{CtlMsg, NetworkStats, PartSent, SendPart};
use crate::payd::automata::Error;
use crate::payd::split;
use crate::rpc::{
    ClientId, LocalFailure, PartId, PartialPayment, PaymentFailed, PaymentFailure, PaymentSent,
    SendPayment,
};
use crate::service::LogStyle;

/// Read-only snapshot of the node environment at the moment a message is
/// processed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PaymentEnv {
    /// Last chain tip height reported by the chain watcher
    pub current_height: u32,
}

/// Outbound effect produced by a lifecycle transition; executed on the live
/// bus by the payd runtime.
#[derive(Clone, Debug, Display)]
pub enum PayAction {
    /// Query the router for remote channel capacity statistics
    #[display("query_network_stats({0})")]
    QueryNetworkStats(HashLock),

    /// Query the relayer for a fresh usable balance snapshot
    #[display("query_balances({0})")]
    QueryBalances(HashLock),

    /// Register and launch one child payment worker for the descriptor
    #[display("dispatch({0})")]
    Dispatch(PartId, SendPart),

    /// Deliver the terminal success event to the enquirer and subscribers
    #[display("notify_sent({1})")]
    NotifySent(ClientId, PaymentSent),

    /// Deliver the terminal failure event to the enquirer and subscribers
    #[display("notify_failed({1})")]
    NotifyFailed(ClientId, PaymentFailed),
}

/// State machine supervising a single multi-part payment.
///
/// Exactly one terminal event is emitted per lifecycle; both terminal
/// decisions keep the machine alive until every outstanding child has
/// reported, so late outcomes are absorbed into the event (and a late
/// success still wins over an abort).
#[derive(Clone, Debug, Display)]
pub enum PaymentLifecycle {
    /// awaiting network statistics from the router
    #[display("STATS")]
    Stats(PaymentInit),

    /// awaiting the initial usable balance snapshot from the relayer
    #[display("BALANCES")]
    Balances(PaymentInit),

    /// children in flight, no terminal decision made
    #[display("IN_PROGRESS")]
    InProgress(PaymentProgress),

    /// a retryable child failure consumed one attempt unit; awaiting fresh
    /// balances before re-splitting the missing amount
    #[display("RETRYING")]
    Retrying(PaymentProgress),

    /// success decision recorded; awaiting outstanding children so the fee
    /// accounting is complete
    #[display("SUCCEEDED")]
    Succeeded(PaymentSucceeded),

    /// failure decision recorded; awaiting outstanding children so their
    /// late outcomes are absorbed
    #[display("ABORTED")]
    Aborted(PaymentAborted),
}

#[derive(Clone, Debug)]
pub struct PaymentInit {
    enquirer: ClientId,
    request: SendPayment,
    network_stats: Option<NetworkStats>,
    seed: u64,
}

#[derive(Clone, Debug)]
pub struct PaymentProgress {
    enquirer: ClientId,
    request: SendPayment,
    network_stats: Option<NetworkStats>,
    pending: BTreeMap<PartId, SendPart>,
    remaining_attempts: u8,
    failures: Vec<PaymentFailure>,
    parts: Vec<PartialPayment>,
    seed: u64,
}

#[derive(Clone, Debug)]
pub struct PaymentSucceeded {
    enquirer: ClientId,
    request: SendPayment,
    preimage: HashPreimage,
    parts: Vec<PartialPayment>,
    pending: BTreeSet<PartId>,
}

#[derive(Clone, Debug)]
pub struct PaymentAborted {
    enquirer: ClientId,
    request: SendPayment,
    failures: Vec<PaymentFailure>,
    pending: BTreeSet<PartId>,
}

type Step = (Option<PaymentLifecycle>, Vec<PayAction>);

impl StateMachine<CtlMsg, PaymentEnv> for PaymentLifecycle {
    type Action = PayAction;
    type Error = Error;

    fn next(
        self,
        message: CtlMsg,
        env: &PaymentEnv,
    ) -> Result<(Option<Self>, Vec<PayAction>), Error> {
        let payment_hash = self.payment_hash();
        debug!("PaymentLifecycle {} received {} message", payment_hash, message);
        let step = match self {
            PaymentLifecycle::Stats(init) => complete_stats(init, message),
            PaymentLifecycle::Balances(init) => complete_balances(init, message, env),
            PaymentLifecycle::InProgress(progress) => supervise(progress, message),
            PaymentLifecycle::Retrying(progress) => resplit(progress, message, env),
            PaymentLifecycle::Succeeded(succeeded) => absorb_after_success(succeeded, message),
            PaymentLifecycle::Aborted(aborted) => absorb_after_abort(aborted, message),
        }?;
        match &step.0 {
            Some(state) => info!("PaymentLifecycle {} switched to {} state", payment_hash, state),
            None => info!("PaymentLifecycle {} has completed its work", payment_hash),
        }
        Ok(step)
    }
}

impl PaymentLifecycle {
    /// Constructs payment lifecycle state machine together with the initial
    /// router query.
    ///
    /// The seed is the only entropy source of the whole lifecycle: it drives
    /// splitter randomization, so a fixed seed makes the workflow fully
    /// deterministic.
    pub fn with(
        enquirer: ClientId,
        request: SendPayment,
        seed: u64,
    ) -> (PaymentLifecycle, Vec<PayAction>) {
        let payment_hash = request.payment_hash;
        debug!(
            "PaymentLifecycle {} is instantiated for {} msat on behalf of client {}",
            payment_hash, request.amount_msat, enquirer
        );
        let lifecycle =
            PaymentLifecycle::Stats(PaymentInit { enquirer, request, network_stats: None, seed });
        (lifecycle, vec![PayAction::QueryNetworkStats(payment_hash)])
    }

    /// Payment hash identifying the lifecycle on the control bus
    pub fn payment_hash(&self) -> HashLock {
        match self {
            PaymentLifecycle::Stats(PaymentInit { request, .. })
            | PaymentLifecycle::Balances(PaymentInit { request, .. })
            | PaymentLifecycle::InProgress(PaymentProgress { request, .. })
            | PaymentLifecycle::Retrying(PaymentProgress { request, .. })
            | PaymentLifecycle::Succeeded(PaymentSucceeded { request, .. })
            | PaymentLifecycle::Aborted(PaymentAborted { request, .. }) => request.payment_hash,
        }
    }

    /// Client which has requested the payment and receives the terminal
    /// event
    pub fn enquirer(&self) -> ClientId {
        match self {
            PaymentLifecycle::Stats(PaymentInit { enquirer, .. })
            | PaymentLifecycle::Balances(PaymentInit { enquirer, .. })
            | PaymentLifecycle::InProgress(PaymentProgress { enquirer, .. })
            | PaymentLifecycle::Retrying(PaymentProgress { enquirer, .. })
            | PaymentLifecycle::Succeeded(PaymentSucceeded { enquirer, .. })
            | PaymentLifecycle::Aborted(PaymentAborted { enquirer, .. }) => *enquirer,
        }
    }

    /// Constructs information message for client reporting
    pub fn info_message(&self) -> String {
        match self {
            PaymentLifecycle::Stats(init) => format!(
                "{} for payment {}",
                "Querying network statistics".promo(),
                init.request.payment_hash.promoter()
            ),
            PaymentLifecycle::Balances(_) => {
                format!("{}", "Querying usable channel balances".promo())
            }
            PaymentLifecycle::InProgress(progress) => format!(
                "{} child parts in flight carrying {} msat",
                progress.pending.len().to_string().promo(),
                progress.pending_msat().to_string().amount()
            ),
            PaymentLifecycle::Retrying(progress) => format!(
                "{} with updated balances ({} attempts left)",
                "Retrying".promo(),
                progress.remaining_attempts.to_string().promoter()
            ),
            PaymentLifecycle::Succeeded(succeeded) => format!(
                "{}; awaiting {} outstanding parts",
                "Payment succeeded".ended(),
                succeeded.pending.len().to_string().ender()
            ),
            PaymentLifecycle::Aborted(aborted) => format!(
                "{}; awaiting {} outstanding parts",
                "Payment aborted".err(),
                aborted.pending.len().to_string().err_details()
            ),
        }
    }
}

impl PaymentProgress {
    fn delivered_msat(&self) -> u64 { self.parts.iter().map(|part| part.amount_msat).sum() }

    fn pending_msat(&self) -> u64 {
        self.pending.values().map(|part| part.final_payload.amount_msat).sum()
    }
}

// State transitions:

fn complete_stats(mut init: PaymentInit, message: CtlMsg) -> Result<Step, Error> {
    let reply = match message {
        CtlMsg::NetworkStats(reply) => reply,
        wrong_msg => return ignore_or_fail(PaymentLifecycle::Stats(init), wrong_msg, "STATS"),
    };
    debug_assert_eq!(
        reply.payment_hash, init.request.payment_hash,
        "payment lifecycle workflow inconsistency: network statistics for a wrong payment"
    );
    init.network_stats = reply.stats;
    let payment_hash = init.request.payment_hash;
    Ok((Some(PaymentLifecycle::Balances(init)), vec![PayAction::QueryBalances(payment_hash)]))
}

fn complete_balances(init: PaymentInit, message: CtlMsg, env: &PaymentEnv) -> Result<Step, Error> {
    let reply = match message {
        CtlMsg::UsableBalances(reply) => reply,
        wrong_msg => return ignore_or_fail(PaymentLifecycle::Balances(init), wrong_msg, "BALANCES"),
    };
    debug_assert_eq!(
        reply.payment_hash, init.request.payment_hash,
        "payment lifecycle workflow inconsistency: balance snapshot for a wrong payment"
    );
    let PaymentInit { enquirer, request, network_stats, seed } = init;

    let (remaining, new_parts) = split::split(
        request.amount_msat,
        &reply.balances,
        network_stats.as_ref(),
        &request,
        env.current_height,
        seed,
    );
    if remaining > 0 {
        debug!(
            "Splitting {} msat failed, {} msat can't be covered by usable balances",
            request.amount_msat, remaining
        );
        let failed = PaymentFailed {
            payment_hash: request.payment_hash,
            failures: vec![PaymentFailure::Local(LocalFailure::BalanceTooLow)],
        };
        return Ok((None, vec![PayAction::NotifyFailed(enquirer, failed)]));
    }

    let mut progress = PaymentProgress {
        enquirer,
        // the initial dispatch consumes one attempt from the global budget
        remaining_attempts: request.max_attempts.saturating_sub(1),
        request,
        network_stats,
        pending: empty!(),
        failures: vec![],
        parts: vec![],
        seed: seed.wrapping_add(1),
    };
    let actions = dispatch(&mut progress.pending, new_parts);
    debug_assert!(
        progress.pending_msat() <= progress.request.amount_msat,
        "dispatched parts must never exceed the requested amount"
    );
    Ok((Some(PaymentLifecycle::InProgress(progress)), actions))
}

fn supervise(mut progress: PaymentProgress, message: CtlMsg) -> Result<Step, Error> {
    match message {
        CtlMsg::PartSent(sent) => Ok(note_success(progress, sent)),
        CtlMsg::PartFailed(failed) => {
            if progress.pending.remove(&failed.part_id).is_none() {
                warn!("Ignoring failure report from unknown part {}", failed.part_id);
                return Ok((Some(PaymentLifecycle::InProgress(progress)), vec![]));
            }
            let fatal = failed.failures.iter().any(PaymentFailure::is_payment_timeout);
            progress.failures.extend(failed.failures);
            if fatal {
                debug!(
                    "Recipient gave up waiting for the payment {}; aborting",
                    progress.request.payment_hash
                );
                return Ok(abort(progress));
            }
            if progress.remaining_attempts == 0 {
                progress.failures.push(PaymentFailure::Local(LocalFailure::AttemptsExhausted));
                return Ok(abort(progress));
            }
            progress.remaining_attempts -= 1;
            let payment_hash = progress.request.payment_hash;
            Ok((
                Some(PaymentLifecycle::Retrying(progress)),
                vec![PayAction::QueryBalances(payment_hash)],
            ))
        }
        wrong_msg => {
            ignore_or_fail(PaymentLifecycle::InProgress(progress), wrong_msg, "IN_PROGRESS")
        }
    }
}

fn resplit(mut progress: PaymentProgress, message: CtlMsg, env: &PaymentEnv) -> Result<Step, Error> {
    match message {
        CtlMsg::UsableBalances(reply) => {
            debug_assert_eq!(
                reply.payment_hash, progress.request.payment_hash,
                "payment lifecycle workflow inconsistency: balance snapshot for a wrong payment"
            );
            let missing = progress
                .request
                .amount_msat
                .saturating_sub(progress.delivered_msat() + progress.pending_msat());
            if missing == 0 {
                return Ok((Some(PaymentLifecycle::InProgress(progress)), vec![]));
            }
            let seed = progress.seed;
            progress.seed = progress.seed.wrapping_add(1);
            let (remaining, new_parts) = split::split(
                missing,
                &reply.balances,
                progress.network_stats.as_ref(),
                &progress.request,
                env.current_height,
                seed,
            );
            if remaining > 0 {
                debug!(
                    "Can't cover missing {} msat of payment {} with updated balances",
                    missing, progress.request.payment_hash
                );
                progress.failures.push(PaymentFailure::Local(LocalFailure::BalanceTooLow));
                return Ok(abort(progress));
            }
            let actions = dispatch(&mut progress.pending, new_parts);
            debug_assert!(
                progress.delivered_msat() + progress.pending_msat()
                    <= progress.request.amount_msat,
                "dispatched parts must never exceed the requested amount"
            );
            Ok((Some(PaymentLifecycle::InProgress(progress)), actions))
        }
        CtlMsg::PartSent(sent) => Ok(note_success(progress, sent)),
        CtlMsg::PartFailed(failed) => {
            if progress.pending.remove(&failed.part_id).is_none() {
                warn!("Ignoring failure report from unknown part {}", failed.part_id);
                return Ok((Some(PaymentLifecycle::Retrying(progress)), vec![]));
            }
            let fatal = failed.failures.iter().any(PaymentFailure::is_payment_timeout);
            progress.failures.extend(failed.failures);
            if fatal {
                return Ok(abort(progress));
            }
            // No extra attempt unit is consumed and no second query is
            // issued: the outstanding re-split covers this child's amount as
            // well, since the missing amount is computed when balances
            // arrive.
            Ok((Some(PaymentLifecycle::Retrying(progress)), vec![]))
        }
        wrong_msg => ignore_or_fail(PaymentLifecycle::Retrying(progress), wrong_msg, "RETRYING"),
    }
}

fn absorb_after_success(
    mut succeeded: PaymentSucceeded,
    message: CtlMsg,
) -> Result<Step, Error> {
    match message {
        CtlMsg::PartSent(sent) => {
            succeeded.pending.remove(&sent.part_id);
            if sent.preimage != succeeded.preimage {
                warn!(
                    "Part {} of payment {} revealed a different preimage",
                    sent.part_id, succeeded.request.payment_hash
                );
            }
            succeeded.parts.extend(sent.parts);
            Ok(finalize_success(succeeded))
        }
        CtlMsg::PartFailed(failed) => {
            // Once any HTLC of the set is fulfilled the recipient must
            // fulfill them all; a failure here means the recipient violated
            // that rule. We stick with the recorded success and only drop the
            // part from the outstanding set.
            warn!(
                "Part {} failed after payment {} was fulfilled; recipient violated the HTLC set \
                 contract",
                failed.part_id, succeeded.request.payment_hash
            );
            succeeded.pending.remove(&failed.part_id);
            Ok(finalize_success(succeeded))
        }
        wrong_msg => {
            ignore_or_fail(PaymentLifecycle::Succeeded(succeeded), wrong_msg, "SUCCEEDED")
        }
    }
}

fn absorb_after_abort(mut aborted: PaymentAborted, message: CtlMsg) -> Result<Step, Error> {
    match message {
        CtlMsg::PartSent(sent) => {
            // Late preimage wins: we received proof of payment cheaper than
            // planned, so the abort decision is overridden.
            info!(
                "Part {} of payment {} succeeded after abort; promoting to success",
                sent.part_id,
                aborted.request.payment_hash
            );
            let PaymentAborted { enquirer, request, mut pending, .. } = aborted;
            pending.remove(&sent.part_id);
            let succeeded = PaymentSucceeded {
                enquirer,
                request,
                preimage: sent.preimage,
                parts: sent.parts,
                pending,
            };
            Ok(finalize_success(succeeded))
        }
        CtlMsg::PartFailed(failed) => {
            if !aborted.pending.remove(&failed.part_id) {
                warn!("Ignoring failure report from unknown part {}", failed.part_id);
                return Ok((Some(PaymentLifecycle::Aborted(aborted)), vec![]));
            }
            aborted.failures.extend(failed.failures);
            Ok(finalize_abort(aborted))
        }
        wrong_msg => ignore_or_fail(PaymentLifecycle::Aborted(aborted), wrong_msg, "ABORTED"),
    }
}

// Shared workflow steps:

fn dispatch(pending: &mut BTreeMap<PartId, SendPart>, parts: Vec<SendPart>) -> Vec<PayAction> {
    parts
        .into_iter()
        .map(|part| {
            let part_id = PartId::random();
            pending.insert(part_id, part.clone());
            PayAction::Dispatch(part_id, part)
        })
        .collect()
}

fn note_success(progress: PaymentProgress, sent: PartSent) -> Step {
    let PaymentProgress { enquirer, request, mut pending, mut parts, .. } = progress;
    if pending.remove(&sent.part_id).is_none() {
        warn!("Success report from unknown part {}; counting it anyway", sent.part_id);
    }
    parts.extend(sent.parts);
    let succeeded = PaymentSucceeded {
        enquirer,
        request,
        preimage: sent.preimage,
        parts,
        pending: pending.keys().copied().collect(),
    };
    finalize_success(succeeded)
}

fn abort(progress: PaymentProgress) -> Step {
    let PaymentProgress { enquirer, request, pending, failures, .. } = progress;
    let aborted =
        PaymentAborted { enquirer, request, failures, pending: pending.keys().copied().collect() };
    finalize_abort(aborted)
}

fn finalize_success(succeeded: PaymentSucceeded) -> Step {
    if !succeeded.pending.is_empty() {
        return (Some(PaymentLifecycle::Succeeded(succeeded)), vec![]);
    }
    let event = PaymentSent {
        payment_hash: succeeded.request.payment_hash,
        preimage: succeeded.preimage,
        amount_msat: succeeded.parts.iter().map(|part| part.amount_msat).sum(),
        fee_msat: succeeded.parts.iter().map(|part| part.fee_msat).sum(),
        parts: succeeded.parts,
    };
    (None, vec![PayAction::NotifySent(succeeded.enquirer, event)])
}

fn finalize_abort(aborted: PaymentAborted) -> Step {
    if !aborted.pending.is_empty() {
        return (Some(PaymentLifecycle::Aborted(aborted)), vec![]);
    }
    let event = PaymentFailed {
        payment_hash: aborted.request.payment_hash,
        failures: aborted.failures,
    };
    (None, vec![PayAction::NotifyFailed(aborted.enquirer, event)])
}

/// Stale responses and late child reports are tolerated in every state; any
/// other message at a wrong stage is a workflow error.
fn ignore_or_fail(
    state: PaymentLifecycle,
    message: CtlMsg,
    stage: &'static str,
) -> Result<Step, Error> {
    match message {
        CtlMsg::NetworkStats(_)
        | CtlMsg::UsableBalances(_)
        | CtlMsg::PartSent(_)
        | CtlMsg::PartFailed(_) => {
            warn!(
                "Ignoring {} message in {} state of payment {}",
                message,
                stage,
                state.payment_hash()
            );
            Ok((Some(state), vec![]))
        }
        wrong_msg => Err(Error::UnexpectedMessage(wrong_msg, stage)),
    }
}

#[cfg(test)]
mod test {
    use amplify::Slice32;

    use super::*;
    use crate::bus::{NetworkStatsReply, PartFailed, UsableBalancesReply};
    use crate::payd::split::test::{balance, balance_with, node, request, stats};
    use crate::rpc::RemoteFailure;

    const HEIGHT: u32 = 600_000;

    fn env() -> PaymentEnv { PaymentEnv { current_height: HEIGHT } }

    fn advance(machine: PaymentLifecycle, message: CtlMsg) -> Step {
        machine.next(message, &env()).expect("transition must succeed")
    }

    fn network_stats(request: &SendPayment, p75_sat: Option<u64>) -> CtlMsg {
        CtlMsg::NetworkStats(NetworkStatsReply {
            payment_hash: request.payment_hash,
            stats: p75_sat.map(stats),
        })
    }

    fn balances(request: &SendPayment, balances: Vec<crate::bus::UsableBalance>) -> CtlMsg {
        CtlMsg::UsableBalances(UsableBalancesReply {
            payment_hash: request.payment_hash,
            balances,
        })
    }

    fn dispatched(actions: &[PayAction]) -> Vec<(PartId, SendPart)> {
        actions
            .iter()
            .filter_map(|action| match action {
                PayAction::Dispatch(part_id, part) => Some((*part_id, part.clone())),
                _ => None,
            })
            .collect()
    }

    fn preimage() -> HashPreimage { HashPreimage::from(Slice32::from([0xCC; 32])) }

    fn part_sent(part_id: PartId, part: &SendPart, fee_msat: u64) -> CtlMsg {
        CtlMsg::PartSent(PartSent {
            part_id,
            payment_hash: part.payment_hash,
            preimage: preimage(),
            parts: vec![PartialPayment {
                part_id,
                amount_msat: part.final_payload.amount_msat,
                fee_msat,
                first_hop: part.route_prefix.short_channel_id,
                route: None,
            }],
        })
    }

    fn part_failed(part_id: PartId, part: &SendPart, failure: PaymentFailure) -> CtlMsg {
        CtlMsg::PartFailed(PartFailed {
            part_id,
            payment_hash: part.payment_hash,
            failures: vec![failure],
        })
    }

    fn unreadable() -> PaymentFailure { PaymentFailure::Unreadable { route: vec![node(2)] } }

    /// Drives a fresh lifecycle to IN_PROGRESS over the provided balances
    fn in_progress(
        request: &SendPayment,
        pool: Vec<crate::bus::UsableBalance>,
        p75_sat: Option<u64>,
    ) -> (PaymentLifecycle, Vec<(PartId, SendPart)>) {
        let (machine, actions) = PaymentLifecycle::with(21, request.clone(), 0);
        assert!(matches!(actions[..], [PayAction::QueryNetworkStats(_)]));
        assert_eq!(machine.to_string(), "STATS");

        let (machine, actions) = advance(machine, network_stats(request, p75_sat));
        let machine = machine.expect("must await balances");
        assert_eq!(machine.to_string(), "BALANCES");
        assert!(matches!(actions[..], [PayAction::QueryBalances(_)]));

        let (machine, actions) = advance(machine, balances(request, pool));
        let machine = machine.expect("must be in progress");
        assert_eq!(machine.to_string(), "IN_PROGRESS");
        let parts = dispatched(&actions);
        assert_eq!(parts.len(), actions.len(), "all actions must be dispatches");
        (machine, parts)
    }

    #[test]
    fn direct_payment_both_parts_succeed() {
        let peer = node(2);
        let request = request(2_000_000, peer);
        let pool = vec![
            balance_with(1, peer, 1_000_000, 1, 1_000_000, 0, 0),
            balance_with(2, peer, 1_500_000, 1, 1_000_000, 0, 0),
        ];
        let (machine, parts) = in_progress(&request, pool, None);
        assert_eq!(parts.len(), 2);
        let total: u64 = parts.iter().map(|(_, part)| part.final_payload.amount_msat).sum();
        assert_eq!(total, 2_000_000);

        let (machine, actions) = advance(machine, part_sent(parts[0].0, &parts[0].1, 3));
        let machine = machine.expect("one part still outstanding");
        assert_eq!(machine.to_string(), "SUCCEEDED");
        assert!(actions.is_empty(), "no terminal event while a part is outstanding");

        let (machine, actions) = advance(machine, part_sent(parts[1].0, &parts[1].1, 4));
        assert!(machine.is_none(), "lifecycle must complete");
        match &actions[..] {
            [PayAction::NotifySent(enquirer, sent)] => {
                assert_eq!(*enquirer, 21);
                assert_eq!(sent.amount_msat, 2_000_000);
                assert_eq!(sent.fee_msat, 7);
                assert_eq!(sent.preimage, preimage());
                assert_eq!(sent.parts.len(), 2);
            }
            wrong => panic!("expected a single terminal success event, got {:?}", wrong),
        }
    }

    #[test]
    fn underfunded_fails_without_spawning_children() {
        let recipient = node(9);
        let request = request(3_000_000, recipient);
        let (machine, _) = PaymentLifecycle::with(7, request.clone(), 0);
        let (machine, _) = advance(machine, network_stats(&request, Some(1_000)));
        let machine = machine.expect("must await balances");

        // aggregate usable balance is below the requested amount
        let pool = vec![balance(1, node(2), 2_000_000)];
        let (machine, actions) = advance(machine, balances(&request, pool));
        assert!(machine.is_none(), "lifecycle must complete without children");
        match &actions[..] {
            [PayAction::NotifyFailed(enquirer, failed)] => {
                assert_eq!(*enquirer, 7);
                assert_eq!(
                    failed.failures,
                    vec![PaymentFailure::Local(LocalFailure::BalanceTooLow)]
                );
                assert_eq!(failed.failures[0].to_string(), "local failure: balance is too low");
            }
            wrong => panic!("expected a single terminal failure event, got {:?}", wrong),
        }
    }

    #[test]
    fn retry_then_exhaust_attempts() {
        let recipient = node(9);
        let mut request = request(3_000_000, recipient);
        request.max_attempts = 2;
        let pool = vec![balance(1, node(2), 5_000_000)];
        let (machine, parts) = in_progress(&request, pool.clone(), Some(5_000));
        assert_eq!(parts.len(), 1);

        // first failure: one attempt unit left, so the payment is retried
        // over fresh balances
        let (machine, actions) =
            advance(machine, part_failed(parts[0].0, &parts[0].1, unreadable()));
        let machine = machine.expect("must be retrying");
        assert_eq!(machine.to_string(), "RETRYING");
        assert!(matches!(actions[..], [PayAction::QueryBalances(_)]));

        let (machine, actions) = advance(machine, balances(&request, pool));
        let machine = machine.expect("must be back in progress");
        assert_eq!(machine.to_string(), "IN_PROGRESS");
        let retry_parts = dispatched(&actions);
        assert_eq!(retry_parts.len(), 1);
        assert_eq!(retry_parts[0].1.final_payload.amount_msat, 3_000_000);

        // second failure: the attempt budget is exhausted
        let (machine, actions) =
            advance(machine, part_failed(retry_parts[0].0, &retry_parts[0].1, unreadable()));
        assert!(machine.is_none(), "lifecycle must complete");
        match &actions[..] {
            [PayAction::NotifyFailed(enquirer, failed)] => {
                assert_eq!(*enquirer, 21);
                assert_eq!(failed.failures.len(), 3);
                assert!(matches!(failed.failures[0], PaymentFailure::Unreadable { .. }));
                assert!(matches!(failed.failures[1], PaymentFailure::Unreadable { .. }));
                assert_eq!(
                    failed.failures[2],
                    PaymentFailure::Local(LocalFailure::AttemptsExhausted)
                );
            }
            wrong => panic!("expected a single terminal failure event, got {:?}", wrong),
        }
    }

    #[test]
    fn recipient_timeout_aborts_without_retry() {
        let recipient = node(9);
        let request = request(2_000_000, recipient);
        let pool = vec![balance(1, node(2), 3_000_000), balance(2, node(3), 3_000_000)];
        let (machine, parts) = in_progress(&request, pool, Some(1_000));
        assert!(parts.len() >= 2);

        let timeout =
            PaymentFailure::Remote { route: vec![node(2)], failure: RemoteFailure::PaymentTimeout };
        let (machine, actions) = advance(machine, part_failed(parts[0].0, &parts[0].1, timeout));
        let machine = machine.expect("other parts still outstanding");
        assert_eq!(machine.to_string(), "ABORTED");
        assert!(actions.is_empty(), "no further child spawns after a recipient timeout");

        // remaining children failures are absorbed into the terminal event
        let mut machine = Some(machine);
        let mut terminal = vec![];
        for (part_id, part) in &parts[1..] {
            let (next, actions) =
                advance(machine.take().expect("must be alive"), part_failed(*part_id, part, unreadable()));
            machine = next;
            terminal = actions;
        }
        assert!(machine.is_none(), "lifecycle must complete after the last child");
        match &terminal[..] {
            [PayAction::NotifyFailed(_, failed)] => {
                assert!(failed.failures.iter().any(PaymentFailure::is_payment_timeout));
                assert_eq!(failed.failures.len(), parts.len());
            }
            wrong => panic!("expected a single terminal failure event, got {:?}", wrong),
        }
    }

    #[test]
    fn late_success_after_abort_wins() {
        let recipient = node(9);
        let mut request = request(5_000_000, recipient);
        request.max_attempts = 1;
        let pool = vec![balance(1, node(2), 3_000_000), balance(2, node(3), 3_000_000)];
        let (machine, parts) = in_progress(&request, pool, Some(3_000));
        assert_eq!(parts.len(), 2);

        // with a single allowed attempt the first failure aborts the payment
        let (machine, actions) =
            advance(machine, part_failed(parts[0].0, &parts[0].1, unreadable()));
        let machine = machine.expect("second part still outstanding");
        assert_eq!(machine.to_string(), "ABORTED");
        assert!(actions.is_empty());

        // the outstanding part delivers: proof of payment wins over abort
        let (machine, actions) = advance(machine, part_sent(parts[1].0, &parts[1].1, 5));
        assert!(machine.is_none(), "lifecycle must complete");
        match &actions[..] {
            [PayAction::NotifySent(_, sent)] => {
                assert_eq!(sent.amount_msat, parts[1].1.final_payload.amount_msat);
                assert_eq!(sent.fee_msat, 5);
                assert_eq!(sent.preimage, preimage());
            }
            wrong => panic!("expected a single terminal success event, got {:?}", wrong),
        }
    }

    #[test]
    fn failure_after_success_is_ignored() {
        let recipient = node(9);
        let request = request(2_000_000, recipient);
        let pool = vec![balance(1, node(2), 3_000_000), balance(2, node(3), 3_000_000)];
        let (machine, parts) = in_progress(&request, pool, Some(1_000));
        assert!(parts.len() >= 2);

        let (mut machine, _) = advance(machine, part_sent(parts[0].0, &parts[0].1, 2));
        for (part_id, part) in &parts[1..parts.len() - 1] {
            let (next, actions) = advance(
                machine.take().expect("must be alive"),
                part_failed(*part_id, part, unreadable()),
            );
            assert!(actions.is_empty());
            machine = next;
        }
        let last = &parts[parts.len() - 1];
        let (machine, actions) = advance(
            machine.take().expect("must be alive"),
            part_failed(last.0, &last.1, unreadable()),
        );
        assert!(machine.is_none(), "lifecycle must complete");
        match &actions[..] {
            [PayAction::NotifySent(_, sent)] => {
                // the terminal amount covers only the fulfilled part; the
                // recipient violated the HTLC set contract by failing the
                // rest
                assert_eq!(sent.amount_msat, parts[0].1.final_payload.amount_msat);
                assert_eq!(sent.parts.len(), 1);
            }
            wrong => panic!("expected a single terminal success event, got {:?}", wrong),
        }
    }

    #[test]
    fn concurrent_failures_fold_into_single_resplit() {
        let recipient = node(9);
        let mut request = request(2_000_000, recipient);
        request.max_attempts = 5;
        let pool = vec![balance(1, node(2), 3_000_000), balance(2, node(3), 3_000_000)];
        let (machine, parts) = in_progress(&request, pool.clone(), Some(1_000));
        assert_eq!(parts.len(), 2);

        let (machine, actions) =
            advance(machine, part_failed(parts[0].0, &parts[0].1, unreadable()));
        let machine = machine.expect("must be retrying");
        assert!(matches!(actions[..], [PayAction::QueryBalances(_)]));

        // a second failure while awaiting balances issues no extra query and
        // consumes no extra attempt
        let (machine, actions) =
            advance(machine, part_failed(parts[1].0, &parts[1].1, unreadable()));
        let machine = machine.expect("must still be retrying");
        assert_eq!(machine.to_string(), "RETRYING");
        assert!(actions.is_empty());

        // the single re-split covers the full missing amount
        let (machine, actions) = advance(machine, balances(&request, pool));
        let machine = machine.expect("must be back in progress");
        let retry_parts = dispatched(&actions);
        let total: u64 =
            retry_parts.iter().map(|(_, part)| part.final_payload.amount_msat).sum();
        assert_eq!(total, 2_000_000);
        match machine {
            PaymentLifecycle::InProgress(ref progress) => {
                assert_eq!(progress.remaining_attempts, 3)
            }
            ref wrong => panic!("expected IN_PROGRESS, got {}", wrong),
        }
    }

    #[test]
    fn total_amount_and_secret_shared_by_all_parts() {
        let recipient = node(9);
        let request = request(3_200_000, recipient);
        let pool = vec![
            balance(1, node(2), 1_200_000),
            balance(2, node(3), 1_200_000),
            balance(3, node(4), 1_200_000),
        ];
        let (_, parts) = in_progress(&request, pool, Some(1_000));
        assert!(parts.len() >= 3);
        for (_, part) in &parts {
            assert_eq!(part.final_payload.total_msat, 3_200_000);
            assert_eq!(part.final_payload.payment_secret, Slice32::from([0xBB; 32]));
            assert_eq!(part.final_payload.cltv_expiry, HEIGHT + 1 + 12);
            assert_eq!(part.max_attempts, 3);
        }
    }
}
