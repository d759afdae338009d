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

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bitcoin::secp256k1::rand;
use microservices::esb;
use wallet::hlc::HashLock;

use crate::bus::{BusMsg, CtlMsg, PartFailed, SendPart, ServiceBus};
use crate::payd::automata::PaymentLifecycle;
use crate::payd::daemons::{self, Daemon, DaemonHandle, PartLauncher};
use crate::rpc::{
    ClientId, Failure, LocalFailure, PartId, PaymentFailure, RpcMsg, SendPayment, ServiceId,
};
use crate::service::LogStyle;
use crate::{Config, Endpoints, Error, Responder, Service};

pub fn run(config: Config) -> Result<(), Error> {
    let runtime = Runtime::with(config.clone(), daemons::process_launcher());
    Service::run(config, runtime, true)
}

pub struct Runtime {
    identity: ServiceId,
    pub(super) config: Config,

    /// Last chain tip height reported by the chain watcher; zero until the
    /// first report arrives
    pub(super) chain_height: u32,

    /// Live payment lifecycles keyed by their payment hash
    pub(super) lifecycles: BTreeMap<HashLock, PaymentLifecycle>,

    /// Parts whose workers were launched but did not yet register on the
    /// control bus; their descriptors are dispatched upon `Hello`
    launching: HashMap<PartId, SendPart>,

    /// Parts with a live worker, mapped to the payment they belong to
    children: HashMap<PartId, HashLock>,

    /// Handles of launched child worker daemons
    handles: Vec<DaemonHandle<Daemon>>,

    /// Clients receiving a copy of every terminal payment event
    subscribers: BTreeSet<ClientId>,

    pub(super) launcher: PartLauncher,
}

impl Runtime {
    /// Constructs the coordinator runtime with the provided child worker
    /// launching capability; tests and embedders may substitute the default
    /// process executor.
    pub fn with(config: Config, launcher: PartLauncher) -> Runtime {
        Runtime {
            identity: ServiceId::PayBroker,
            config,
            chain_height: 0,
            lifecycles: empty!(),
            launching: empty!(),
            children: empty!(),
            handles: vec![],
            subscribers: empty!(),
            launcher,
        }
    }
}

impl Responder for Runtime {}

impl esb::Handler<ServiceBus> for Runtime {
    type Request = BusMsg;
    type Error = Error;

    fn identity(&self) -> ServiceId { self.identity.clone() }

    fn handle(
        &mut self,
        endpoints: &mut Endpoints,
        bus: ServiceBus,
        source: ServiceId,
        message: BusMsg,
    ) -> Result<(), Self::Error> {
        match (bus, message, source) {
            (ServiceBus::Ctl, BusMsg::Ctl(msg), source) => self.handle_ctl(endpoints, source, msg),
            (ServiceBus::Rpc, BusMsg::Rpc(msg), ServiceId::Client(client_id)) => {
                self.handle_rpc(endpoints, client_id, msg)
            }
            (bus, msg, _) => Err(Error::wrong_esb_msg(bus, &msg)),
        }
    }

    fn handle_err(
        &mut self,
        _endpoints: &mut Endpoints,
        err: esb::Error<ServiceId>,
    ) -> Result<(), Self::Error> {
        // We do nothing and do not propagate error; it's already being
        // reported with `error!` macro by the controller. If we propagate
        // error here this will make the whole daemon panic
        error!("Error processing event loop: {}", err);
        Ok(())
    }
}

impl Runtime {
    fn handle_ctl(
        &mut self,
        endpoints: &mut Endpoints,
        source: ServiceId,
        message: CtlMsg,
    ) -> Result<(), Error> {
        match message {
            CtlMsg::Hello => self.accept_hello(endpoints, source),

            CtlMsg::NetworkStats(ref reply) => {
                let payment_hash = reply.payment_hash;
                self.process(endpoints, payment_hash, message)?;
                Ok(())
            }
            CtlMsg::UsableBalances(ref reply) => {
                let payment_hash = reply.payment_hash;
                self.process(endpoints, payment_hash, message)?;
                Ok(())
            }

            CtlMsg::PartSent(ref sent) => {
                let payment_hash = sent.payment_hash;
                self.children.remove(&sent.part_id);
                self.process(endpoints, payment_hash, message)?;
                Ok(())
            }
            CtlMsg::PartFailed(ref failed) => {
                let payment_hash = failed.payment_hash;
                self.children.remove(&failed.part_id);
                self.process(endpoints, payment_hash, message)?;
                Ok(())
            }

            CtlMsg::HeightChanged(height) => {
                debug!("Chain tip moved to height {}", height);
                self.chain_height = height;
                Ok(())
            }

            CtlMsg::EsbError { destination, ref error } => {
                self.child_offline(endpoints, destination, error)
            }
            CtlMsg::Error { destination, ref error, .. } => {
                self.child_offline(endpoints, destination, error)
            }

            wrong_msg => Err(Error::wrong_esb_msg_source(ServiceBus::Ctl, &wrong_msg, source)),
        }
    }

    fn handle_rpc(
        &mut self,
        endpoints: &mut Endpoints,
        client_id: ClientId,
        message: RpcMsg,
    ) -> Result<(), Error> {
        match message {
            RpcMsg::SendPayment(request) => self.start_payment(endpoints, client_id, request),

            RpcMsg::Subscribe => {
                if self.subscribers.insert(client_id) {
                    debug!(
                        "Client {} subscribed to payment events; total {} subscribers",
                        client_id,
                        self.subscribers.len()
                    );
                }
                self.report_success(endpoints, client_id, "subscribed to payment events");
                Ok(())
            }
            RpcMsg::Unsubscribe => {
                self.subscribers.remove(&client_id);
                self.report_success(endpoints, client_id, "unsubscribed from payment events");
                Ok(())
            }

            wrong_msg => Err(Error::wrong_esb_msg(ServiceBus::Rpc, &wrong_msg)),
        }
    }

    fn accept_hello(&mut self, endpoints: &mut Endpoints, source: ServiceId) -> Result<(), Error> {
        info!("{} daemon is {}", source.ender(), "connected".ended());

        if let ServiceId::Part(part_id) = source {
            if let Some(part) = self.launching.remove(&part_id) {
                debug!(
                    "Daemon {} is known: we spawned it to deliver a payment part. Dispatching \
                     the part",
                    source
                );
                endpoints.send_to(
                    ServiceBus::Ctl,
                    self.identity(),
                    source,
                    BusMsg::Ctl(CtlMsg::SendPart(part)),
                )?;
            } else {
                warn!(
                    "Child worker {} was already dispatched; the service probably was relaunched",
                    part_id
                );
            }
        }
        Ok(())
    }

    fn start_payment(
        &mut self,
        endpoints: &mut Endpoints,
        client_id: ClientId,
        request: SendPayment,
    ) -> Result<(), Error> {
        info!(
            "{} {} msat to {} requested by client {}",
            "Sending".promo(),
            request.amount_msat.to_string().amount(),
            request.recipient.addr(),
            client_id
        );

        if request.amount_msat == 0 {
            self.report_failure(endpoints, client_id, Failure {
                code: 7002,
                info: s!("payment amount must be positive"),
            });
            return Ok(());
        }
        if request.max_attempts == 0 {
            self.report_failure(endpoints, client_id, Failure {
                code: 7003,
                info: s!("at least one payment attempt must be allowed"),
            });
            return Ok(());
        }
        if self.lifecycles.contains_key(&request.payment_hash) {
            self.report_failure(endpoints, client_id, Failure {
                code: 7001,
                info: format!("payment {} is already in progress", request.payment_hash),
            });
            return Ok(());
        }

        let payment_hash = request.payment_hash;
        let (machine, actions) = PaymentLifecycle::with(client_id, request, rand::random());
        self.report_progress(endpoints, client_id, machine.info_message());
        self.lifecycles.insert(payment_hash, machine);
        self.execute(endpoints, actions)?;
        Ok(())
    }

    /// Registers the part with the registry and launches its worker. Launch
    /// failures are absorbed as a child failure so the lifecycle can route
    /// around them.
    pub(super) fn dispatch_part(
        &mut self,
        endpoints: &mut Endpoints,
        part_id: PartId,
        part: SendPart,
    ) -> Result<(), crate::payd::automata::Error> {
        let payment_hash = part.payment_hash;
        self.children.insert(part_id, payment_hash);
        self.launching.insert(part_id, part);

        match self.launch_daemon(Daemon::Partd(part_id)) {
            Ok(handle) => {
                debug!("Child worker for part {} launched", part_id);
                self.handles.push(handle);
                Ok(())
            }
            Err(err) => {
                error!("Can't launch child worker for part {}: {}", part_id, err);
                self.launching.remove(&part_id);
                self.children.remove(&part_id);
                let failed = PartFailed {
                    part_id,
                    payment_hash,
                    failures: vec![PaymentFailure::Local(LocalFailure::Other(err.to_string()))],
                };
                self.process(endpoints, payment_hash, CtlMsg::PartFailed(failed))?;
                Ok(())
            }
        }
    }

    /// Converts an unreachable-daemon report into a child failure when the
    /// destination was one of our child workers.
    fn child_offline(
        &mut self,
        endpoints: &mut Endpoints,
        destination: ServiceId,
        error: &str,
    ) -> Result<(), Error> {
        let part_id = match destination.to_part_id() {
            Some(part_id) => part_id,
            None => {
                error!("Daemon {} has failed: {}", destination, error);
                return Ok(());
            }
        };
        self.launching.remove(&part_id);
        if let Some(payment_hash) = self.children.remove(&part_id) {
            let failed = PartFailed {
                part_id,
                payment_hash,
                failures: vec![PaymentFailure::Local(LocalFailure::Other(format!(
                    "child worker is offline: {}",
                    error
                )))],
            };
            self.process(endpoints, payment_hash, CtlMsg::PartFailed(failed))?;
        }
        Ok(())
    }

    /// Delivers a terminal payment event to the enquirer and to all
    /// subscribed clients.
    pub(super) fn notify(&self, endpoints: &mut Endpoints, enquirer: ClientId, message: RpcMsg) {
        let _ = self
            .send_rpc(endpoints, enquirer, message.clone())
            .map_err(|err| error!("Can't notify client #{}: {}", enquirer, err));
        for &client in &self.subscribers {
            if client != enquirer {
                let _ = self
                    .send_rpc(endpoints, client, message.clone())
                    .map_err(|err| error!("Can't notify subscriber #{}: {}", client, err));
            }
        }
    }

    /// Drops registry entries of a completed payment.
    pub(super) fn forget_payment(&mut self, payment_hash: HashLock) {
        self.children.retain(|_, hash| *hash != payment_hash);
        self.launching.retain(|_, part| part.payment_hash != payment_hash);
    }
}
