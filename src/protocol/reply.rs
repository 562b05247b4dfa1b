/// Fixed client-visible replies
///
/// Every failure a client can observe maps to one of these byte strings;
/// backend transport details never leak through.

pub const PROTO_ERROR: &[u8] = b"-Proto error\r\n";
pub const PROTO_NOT_SUPPORT: &[u8] = b"-Proto not support\r\n";
pub const WRONG_ARITY: &[u8] = b"-Wrong number of arguments\r\n";
pub const REQUEST_ERROR: &[u8] = b"-Request error\r\n";
pub const NOAUTH: &[u8] = b"-NOAUTH Authentication required.\r\n";

pub const OK: &[u8] = b"+OK\r\n";
pub const PONG: &[u8] = b"+PONG\r\n";

pub const AUTH_NOT_SET: &[u8] = b"-ERR Client sent AUTH, but no password is set\r\n";
pub const AUTH_INVALID: &[u8] = b"-ERR invalid password\r\n";

pub const GROUP_NOT_EXISTS: &[u8] = b"-Group is not exists\r\n";
pub const INVALID_HASH_VALUE: &[u8] = b"-Invalid hash value\r\n";

pub const HASHMAPPING_USAGE: &[u8] = b"+Usage:\nHASHMAPPING [hash value] [group name]\n\r\n";
pub const ADDKEYMAPPING_USAGE: &[u8] = b"+Usage:\nADDKEYMAPPING [group name] [key1] [key2]...\n\r\n";
pub const DELKEYMAPPING_USAGE: &[u8] = b"+Usage:\nDELKEYMAPPING [key1] [key2]...\n\r\n";

/// Map a failed backend round trip to the client reply
pub fn unavailable() -> bytes::Bytes {
    bytes::Bytes::from_static(REQUEST_ERROR)
}
