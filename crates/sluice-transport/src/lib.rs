#![warn(missing_docs)]

//! Sluice transport subsystem: rank-addressed messaging over TCP or an
//! in-process fabric, group collectives and one-way signals.

pub mod collective;
pub mod error;
pub mod local;
pub mod mailbox;
pub mod protocol;
pub mod signal;
pub mod tcp;
pub mod transport;

pub use collective::Group;
pub use error::{Result, TransportError};
pub use local::{LocalFabric, LocalTransport};
pub use signal::{ChannelCommand, OneWaySignal};
pub use tcp::{TcpConfig, TcpTransport};
pub use transport::{Envelope, Rank, Tag, TagKind, Transport};
