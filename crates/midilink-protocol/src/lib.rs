pub mod mac;
pub mod message;
pub mod pinconfig;
pub mod sysex;

/// Configuration-protocol version. Frames from a different major version are
/// rejected; minor versions are additive and tolerated.
pub const PROTOCOL_VERSION_MAJOR: u8 = 0;
pub const PROTOCOL_VERSION_MINOR: u8 = 5;
pub const PROTOCOL_VERSION_PATCH: u8 = 1;

/// Upper bound on peers a node will track (and mirror into the transport).
pub const MAX_PEERS: usize = 20;
