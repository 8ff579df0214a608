//! ClickHouse native TCP protocol
//!
//! Only the subset needed to authenticate, probe liveness and run statements
//! that return no (or small, simply typed) result sets is implemented.

pub mod constants;
pub mod decode;
pub mod encode;
pub mod message;

pub use decode::decode_packet;
pub use encode::encode_packet;
pub use message::{
    BlockSummary, ClientInfo, ClientPacket, ColumnHeader, Progress, ProfileInfo, ServerException,
    ServerInfo, ServerPacket,
};
