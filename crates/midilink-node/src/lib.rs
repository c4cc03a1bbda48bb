//! Core of a wireless MIDI control-surface node.
//!
//! The node turns sampled hardware inputs into MIDI events broadcast to a
//! set of paired peers, drives hardware outputs from inbound MIDI, and
//! answers a SysEx configuration protocol for remote management of the pin
//! mapping and the peer list.
//!
//! Everything hardware- and platform-specific sits behind the collaborator
//! traits in [`hal`], [`transport`] and [`store`]; the embedding application
//! implements those, constructs a [`Node`] and drives it from a single
//! polling loop (`tick` + the `handle_*` entry points). Nothing here blocks
//! or spawns threads.

pub mod engine;
pub mod error;
pub mod hal;
pub mod node;
pub mod peers;
pub mod store;
pub mod transport;

pub use engine::{EngineSettings, PinEngine};
pub use error::NodeError;
pub use hal::Hal;
pub use node::Node;
pub use peers::PeerDirectory;
pub use store::{FileStore, MemStore, Storage};
pub use transport::{LocalMidi, Transport};
