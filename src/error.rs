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

use amplify::IoError;
use microservices::esb;

use crate::bus::ServiceBus;
use crate::payd::automata;
use crate::payd::{Daemon, DaemonError};
use crate::rpc::ServiceId;

#[derive(Debug, Display, From, Error)]
#[display(doc_comments)]
#[non_exhaustive]
pub enum Error {
    /// ESB error: {0}
    #[from]
    Esb(esb::Error<ServiceId>),

    /// unable to launch child payment worker. Details: {0}
    #[from(DaemonError<Daemon>)]
    DaemonLaunch(Box<DaemonError<Daemon>>),

    /// payment lifecycle workflow failure: {0}
    #[from]
    Lifecycle(automata::Error),

    /// message `{1}` is not supported on {0} message bus
    NotSupported(ServiceBus, String),

    /// message `{1}` is not supported on {0} message bus for service {2}
    SourceNotSupported(ServiceBus, String, ServiceId),

    /// input/output error: {0}
    #[from(std::io::Error)]
    Io(IoError),
}

impl Error {
    pub fn wrong_esb_msg(bus: ServiceBus, message: &impl ToString) -> Error {
        Error::NotSupported(bus, message.to_string())
    }

    pub fn wrong_esb_msg_source(
        bus: ServiceBus,
        message: &impl ToString,
        source: ServiceId,
    ) -> Error {
        Error::SourceNotSupported(bus, message.to_string(), source)
    }
}

impl From<Error> for esb::Error<ServiceId> {
    fn from(err: Error) -> Self {
        match err {
            Error::Esb(err) => err,
            err => esb::Error::ServiceError(err.to_string()),
        }
    }
}
