//! Wire protocol: opcode catalogue, codec, packet bodies, and the transport
//! boundary the server/client cores are written against.

pub mod codec;
pub mod opcode;
pub mod packets;
pub mod transport;

pub use codec::{Decode, DecodeResult, Encode, Reader, Writer};
pub use opcode::{GameInfoFlags, Opcode};
pub use transport::{AdmissionEvent, InboundEvent, Priority, Reliability, TransportAdapter};
