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

use internet2::ZmqSocketType;
use microservices::esb;

use crate::bus::{BusMsg, CtlMsg, ServiceBus};
use crate::rpc::{ClientId, Failure, OptionDetails, RpcMsg, ServiceId};
use crate::{Config, Error};

/// Set of ZMQ bus endpoints the daemon is connected to
pub type Endpoints = esb::EndpointList<ServiceBus>;

pub struct Service<Runtime>
where
    Runtime: esb::Handler<ServiceBus, Request = BusMsg>,
    esb::Error<ServiceId>: From<Runtime::Error>,
{
    esb: esb::Controller<ServiceBus, BusMsg, Runtime>,
    broker: bool,
}

impl<Runtime> Service<Runtime>
where
    Runtime: esb::Handler<ServiceBus, Request = BusMsg>,
    esb::Error<ServiceId>: From<Runtime::Error>,
{
    pub fn run(config: Config, runtime: Runtime, broker: bool) -> Result<(), Error> {
        let service = Self::with(config, runtime, broker)?;
        service.run_loop()?;
        unreachable!()
    }

    fn with(
        config: Config,
        runtime: Runtime,
        broker: bool,
    ) -> Result<Self, esb::Error<ServiceId>> {
        let router = if !broker { Some(ServiceId::router()) } else { None };
        let zmq_socket_type =
            if broker { ZmqSocketType::RouterBind } else { ZmqSocketType::RouterConnect };
        let esb = esb::Controller::with(
            map! {
                ServiceBus::Ctl => esb::BusConfig::with_addr(
                    config.ctl_endpoint,
                    zmq_socket_type,
                    router.clone()
                ),
                ServiceBus::Rpc => esb::BusConfig::with_addr(
                    config.rpc_endpoint,
                    zmq_socket_type,
                    router
                )
            },
            runtime,
        )?;
        Ok(Self { esb, broker })
    }

    pub fn broker(config: Config, runtime: Runtime) -> Result<Self, esb::Error<ServiceId>> {
        Self::with(config, runtime, true)
    }

    pub fn service(config: Config, runtime: Runtime) -> Result<Self, esb::Error<ServiceId>> {
        Self::with(config, runtime, false)
    }

    pub fn is_broker(&self) -> bool { self.broker }

    pub fn run_loop(mut self) -> Result<(), Error> {
        if !self.is_broker() {
            std::thread::sleep(core::time::Duration::from_secs(1));
            self.esb.send_to(
                ServiceBus::Ctl,
                ServiceId::PayBroker,
                BusMsg::Ctl(CtlMsg::Hello),
            )?;
        }

        let identity = self.esb.handler().identity();
        info!("{} started", identity);

        self.esb.run_or_panic(&identity.to_string());

        unreachable!()
    }
}

/// Trait for daemons reporting their operation status back to RPC clients
pub trait Responder
where
    Self: esb::Handler<ServiceBus>,
    esb::Error<ServiceId>: From<Self::Error>,
{
    /// Sends a single RPC message to a client.
    fn send_rpc(
        &self,
        endpoints: &mut Endpoints,
        client: ClientId,
        message: impl Into<RpcMsg>,
    ) -> Result<(), esb::Error<ServiceId>> {
        endpoints.send_to(
            ServiceBus::Rpc,
            self.identity(),
            ServiceId::Client(client),
            BusMsg::Rpc(message.into()),
        )
    }

    /// Reports progress of a workflow to a client, swallowing communication
    /// errors: a disconnected client must not halt the workflow.
    fn report_progress(&self, endpoints: &mut Endpoints, client: ClientId, msg: impl ToString) {
        let _ = self
            .send_rpc(endpoints, client, RpcMsg::Progress(msg.to_string()))
            .map_err(|err| error!("Can't report back to client #{}: {}", client, err));
    }

    /// Reports successful workflow completion to a client.
    fn report_success(
        &self,
        endpoints: &mut Endpoints,
        client: ClientId,
        msg: impl Into<OptionDetails>,
    ) {
        let _ = self
            .send_rpc(endpoints, client, RpcMsg::Success(msg.into()))
            .map_err(|err| error!("Can't report back to client #{}: {}", client, err));
    }

    /// Reports a workflow failure to a client.
    fn report_failure(&self, endpoints: &mut Endpoints, client: ClientId, failure: Failure) {
        let _ = self
            .send_rpc(endpoints, client, RpcMsg::Failure(failure))
            .map_err(|err| error!("Can't report back to client #{}: {}", client, err));
    }
}

use colored::Colorize;

pub trait LogStyle: ToString {
    fn promo(&self) -> colored::ColoredString { self.to_string().bold().bright_blue() }

    fn promoter(&self) -> colored::ColoredString { self.to_string().italic().bright_blue() }

    fn ended(&self) -> colored::ColoredString { self.to_string().bold().bright_green() }

    fn ender(&self) -> colored::ColoredString { self.to_string().italic().bright_green() }

    fn amount(&self) -> colored::ColoredString { self.to_string().bold().bright_yellow() }

    fn addr(&self) -> colored::ColoredString { self.to_string().bold().bright_yellow() }

    fn err(&self) -> colored::ColoredString { self.to_string().bold().bright_red() }

    fn err_details(&self) -> colored::ColoredString { self.to_string().italic().bright_red() }
}

impl<T> LogStyle for T where T: ToString {}
