// Gateway module - Pairing, sessions, commands and event fan-out for remote clients

pub mod commands;
pub mod pairing;
pub mod protocol;
pub mod server;
pub mod session;

pub use commands::{CommandRouter, COMMANDS};
pub use pairing::{DevicePairing, PairingBook, PairingCreated};
pub use protocol::{
    ClientMessage, CommandOutcome, CommandRequest, CommandResponse, DeviceInfo, ServerMessage,
};
pub use server::{router, serve, Gateway};
pub use session::{BroadcastReport, SessionRegistry, SessionId};
