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
use std::str::FromStr;

use amplify::hex;
use amplify::hex::ToHex;
use amplify::Slice32;
use bitcoin::secp256k1::rand::{self, RngCore};
use microservices::esb;
use strict_encoding::{strict_deserialize, strict_serialize};

#[derive(Wrapper, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, From, Default)]
#[derive(StrictEncode, StrictDecode)]
pub struct ServiceName([u8; 32]);

impl Display for ServiceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            write!(f, "{}..{}", self.0[..4].to_hex(), self.0[(self.0.len() - 4)..].to_hex())
        } else {
            f.write_str(&String::from_utf8_lossy(&self.0))
        }
    }
}

impl FromStr for ServiceName {
    type Err = hex::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > 32 {
            let mut me = Self::default();
            me.0.copy_from_slice(&s.as_bytes()[0..32]);
            Ok(me)
        } else {
            let mut me = Self::default();
            me.0[0..s.len()].copy_from_slice(s.as_bytes());
            Ok(me)
        }
    }
}

pub type ClientId = u64;

/// Unique identifier of a single child payment attempt (one HTLC part of a
/// multi-part payment). Each part spawned by the coordinator gets a fresh id
/// for the whole lifetime of the attempt.
#[derive(Wrapper, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display, From)]
#[derive(StrictEncode, StrictDecode)]
#[display(inner)]
#[wrapper(FromStr, LowerHex, UpperHex)]
pub struct PartId(Slice32);

impl PartId {
    /// Generates new random part id
    pub fn random() -> Self {
        let mut entropy = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut entropy);
        PartId::from(Slice32::from(entropy))
    }
}

/// Identifiers of daemons participating in MPP Node
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, From, StrictEncode, StrictDecode)]
pub enum ServiceId {
    #[display("loopback")]
    #[strict_encoding(value = 0)]
    Loopback,

    #[display("payd")]
    #[strict_encoding(value = 0x20)]
    PayBroker,

    #[display("routed")]
    #[strict_encoding(value = 0x26)]
    Router,

    #[display("relayerd")]
    #[strict_encoding(value = 0x28)]
    Relayer,

    #[display("watchd")]
    #[strict_encoding(value = 0x27)]
    Watch,

    #[display("part<{0}>")]
    #[from]
    #[strict_encoding(value = 0x23)]
    Part(PartId),

    #[display("client<{0}>")]
    #[strict_encoding(value = 2)]
    Client(ClientId),

    #[display("other<{0}>")]
    #[strict_encoding(value = 0xFF)]
    Other(ServiceName),
}

impl ServiceId {
    pub fn router() -> ServiceId { ServiceId::PayBroker }

    pub fn client() -> ServiceId { ServiceId::Client(rand::random()) }

    pub fn to_part_id(&self) -> Option<PartId> {
        match self {
            ServiceId::Part(part_id) => Some(*part_id),
            _ => None,
        }
    }
}

impl esb::ServiceAddress for ServiceId {}

impl From<ServiceId> for Vec<u8> {
    fn from(daemon_id: ServiceId) -> Self {
        strict_serialize(&daemon_id).expect("Memory-based encoding does not fail")
    }
}

impl From<Vec<u8>> for ServiceId {
    fn from(vec: Vec<u8>) -> Self {
        strict_deserialize(&vec).unwrap_or_else(|_| {
            ServiceId::Other(
                ServiceName::from_str(&String::from_utf8_lossy(&vec))
                    .expect("ServiceName conversion never fails"),
            )
        })
    }
}
