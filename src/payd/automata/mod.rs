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

mod lifecycle;

pub use lifecycle::{PayAction, PaymentEnv, PaymentLifecycle};
use microservices::esb;
use microservices::esb::Handler;
use wallet::hlc::HashLock;

use crate::automata::StateMachine;
use crate::bus::{BusMsg, CtlMsg, ServiceBus};
use crate::payd::runtime::Runtime;
use crate::payd::{Daemon, DaemonError};
use crate::rpc::{Failure, RpcMsg, ServiceId};
use crate::service::LogStyle;
use crate::{Endpoints, Responder};

/// Errors for payment lifecycle workflow
#[derive(Debug, Display, From, Error)]
#[display(doc_comments)]
pub enum Error {
    /// the received message {0} was not expected at the {1} stage of the
    /// payment lifecycle
    UnexpectedMessage(CtlMsg, &'static str),

    /// error sending RPC request during state transition. Details: {0}
    #[from]
    Esb(esb::Error<ServiceId>),

    /// unable to launch child payment worker. Details: {0}
    #[from(DaemonError<Daemon>)]
    DaemonLaunch(Box<DaemonError<Daemon>>),
}

impl Error {
    /// Returns unique error number sent to the client alongside text message
    /// to help run client-side diagnostics
    pub fn errno(&self) -> u16 {
        match self {
            Error::UnexpectedMessage(..) => 1001,
            Error::Esb(_) => 3001,
            Error::DaemonLaunch(_) => 5001,
        }
    }
}

impl Runtime {
    /// Processes incoming message updating the state of the corresponding
    /// payment lifecycle. Returns bool indicating whether a state machine
    /// transition has happened.
    pub fn process(
        &mut self,
        endpoints: &mut Endpoints,
        payment_hash: HashLock,
        message: CtlMsg,
    ) -> Result<bool, Error> {
        let machine = match self.lifecycles.remove(&payment_hash) {
            Some(machine) => machine,
            None => {
                warn!("Ignoring {} message for unknown payment {}", message, payment_hash);
                return Ok(false);
            }
        };
        let enquirer = machine.enquirer();
        let env = PaymentEnv { current_height: self.chain_height };

        match machine.next(message, &env) {
            Ok((Some(machine), actions)) => {
                let info = machine.info_message();
                self.lifecycles.insert(payment_hash, machine);
                self.execute(endpoints, actions)?;
                // Ignoring possible reporting errors here and after: do not
                // want to halt the payment just because the client
                // disconnected
                self.report_progress(endpoints, enquirer, info);
            }
            Ok((None, actions)) => {
                self.execute(endpoints, actions)?;
                self.forget_payment(payment_hash);
            }
            Err(err) => {
                error!("{}: {}", "Payment lifecycle failure".err(), err.err_details());
                self.report_failure(endpoints, enquirer, Failure {
                    code: err.errno(),
                    info: err.to_string(),
                });
                return Err(err);
            }
        }
        Ok(true)
    }

    /// Executes the outbound actions produced by a lifecycle transition on
    /// the live bus.
    fn execute(&mut self, endpoints: &mut Endpoints, actions: Vec<PayAction>) -> Result<(), Error> {
        for action in actions {
            trace!("Executing {} action", action);
            match action {
                PayAction::QueryNetworkStats(payment_hash) => {
                    endpoints.send_to(
                        ServiceBus::Ctl,
                        self.identity(),
                        ServiceId::Router,
                        BusMsg::Ctl(CtlMsg::GetNetworkStats(payment_hash)),
                    )?;
                }
                PayAction::QueryBalances(payment_hash) => {
                    endpoints.send_to(
                        ServiceBus::Ctl,
                        self.identity(),
                        ServiceId::Relayer,
                        BusMsg::Ctl(CtlMsg::GetUsableBalances(payment_hash)),
                    )?;
                }
                PayAction::Dispatch(part_id, part) => {
                    self.dispatch_part(endpoints, part_id, part)?;
                }
                PayAction::NotifySent(enquirer, sent) => {
                    info!("{} {}", "Payment complete:".ended(), sent.ender());
                    self.notify(endpoints, enquirer, RpcMsg::PaymentSent(sent));
                }
                PayAction::NotifyFailed(enquirer, failed) => {
                    info!("{} {}", "Payment failed:".err(), failed.err_details());
                    self.notify(endpoints, enquirer, RpcMsg::PaymentFailed(failed));
                }
            }
        }
        Ok(())
    }
}
