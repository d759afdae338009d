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

//! State machines help to organize complex asynchronous workflows involving
//! multiple daemon interactions.
//!
//! A state machine is a tagged-variant value consumed by each transition.
//! Transitions are pure: they take an inbound bus message plus a read-only
//! context snapshot and return the next state together with the list of
//! outbound actions for the runtime to execute on the live bus. This keeps
//! the workflow logic testable without any transport: tests feed messages and
//! assert on states and actions, while runtimes own the side effects.

/// State machine used by runtimes for managing complex asynchronous
/// workflows:
/// - Supervising the lifecycle of a multi-part payment by payd;
/// - Driving a single child payment attempt inside a payment worker.
pub trait StateMachine<Message, Context>: Sized {
    /// Outbound effect requested by a transition and executed by the runtime
    type Action;

    /// Workflow-specific error type
    type Error: std::error::Error;

    /// Move state machine to a next step in response to the provided
    /// message.
    ///
    /// At the completion of the cycle the state machine is consumed and
    /// `Ok((None, actions))` is returned; any actions accompanying the final
    /// transition must still be executed.
    fn next(
        self,
        message: Message,
        context: &Context,
    ) -> Result<(Option<Self>, Vec<Self::Action>), Self::Error>;
}
