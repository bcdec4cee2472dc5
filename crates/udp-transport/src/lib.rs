//! udp-transport: socket pair and receive thread for ACU device traffic
//!
//! A [`CommunicationController`] binds one local send socket and one local receive
//! socket, runs a single background receive thread that queues datagrams on a
//! bounded channel, and can be set up, stopped and reconfigured from any thread.

mod types;
pub use types::{CommConfig, Datagram, LocalAddrs, Phase};

mod error;
pub use error::{Result, TransportError};

mod socket;

mod controller;
pub use controller::{CommunicationController, Hook};
