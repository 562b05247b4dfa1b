/// Wire protocol: incremental RESP parsing and the proxy's fixed replies

pub mod reply;
pub mod resp;

pub use resp::{Message, MessageKind, RespEncoder, RespError, RespParser, RespValue};
