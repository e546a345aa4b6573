use serde::{Deserialize, Serialize};

/// Client-to-server frames (§6 WS protocol).
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// `data` is base64-encoded terminal input bytes.
    Input { data: String },
    Resize { cols: u16, rows: u16 },
    Ping,
    /// Answers a server-initiated `ServerMessage::Ping` (§4.6 heartbeat).
    Pong,
}

/// Server-to-client frames (§6 WS protocol).
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected { session_id: uuid::Uuid, message: String },
    /// `data` is base64-encoded terminal output bytes.
    Output { data: String },
    Exit { code: i32 },
    Error { message: String },
    Ping,
    Pong,
    ServerShutdown { message: String },
}

/// Close codes for each way a connection ends without a graceful client
/// disconnect (§6, §5). Standard codes (1000-2999) are reserved by the WS
/// spec; everything except `SERVER_SHUTDOWN` lives in the private-use range.
/// `4002` and `4009` are unassigned by §6's table; `4002` is used here for
/// heartbeat timeout (required by §4.6, uncoded in §6) and `4009` for the
/// RATE_LIMIT_AUTH_PER_MINUTE connect-time check (§6).
pub mod close_code {
    pub const MISSING_CREDENTIAL: u16 = 4001;
    pub const HEARTBEAT_TIMEOUT: u16 = 4002;
    pub const CREDENTIAL_EXPIRED: u16 = 4003;
    pub const CREDENTIAL_INVALID: u16 = 4004;
    pub const SESSION_NOT_FOUND: u16 = 4005;
    pub const FORBIDDEN: u16 = 4006;
    pub const SESSION_NOT_ACTIVE: u16 = 4007;
    pub const SUPERSEDED: u16 = 4008;
    pub const RATE_LIMITED: u16 = 4009;
    /// Standard WS "going away" code, used for server shutdown per §5.
    pub const SERVER_SHUTDOWN: u16 = 1001;
}
