//! Live broadcast control socket.
//!
//! The socket carries JSON control frames only. After a permit request the
//! server announces a master playlist, which is resolved to the address of
//! its highest bandwidth variant.

mod frame;
mod playlist;
mod session;

pub use frame::{
    EmptyBody, LiveFrame, OutboundFrame, PermitRequirement, RoomRequirement, StreamRequirement,
    WatchCommand,
};
pub use playlist::{parse_master_playlist, resolve_variant_url, select_variant};
pub use session::{
    CloseReason, LiveEvent, LivePhase, LiveReport, LiveSessionLoop, ResolvedStream, resolve_stream,
};
