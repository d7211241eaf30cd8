use std::io;
use ring;
use json;
use base64;
use serde_json;
use reqwest;

macro_rules! impl_from_for_error {
        ($error:ident, $($var:ident => $orig:ty),*) => {
                $(
                        impl From<$orig> for $error {
                                fn from(err: $orig) -> $error {
                                        $error::$var(err)
                                }
                        }
                 )*
        }
}

#[macro_export]
macro_rules! bail_untyped {
        ($msg:expr) => {
                return Err(WaError::Untyped($msg.into()));
        };
        ($($arg:tt)*) => {
                return Err(WaError::UntypedOwned(format!($($arg)*)));
        }
}

pub trait WaErrorContext {
        fn with_context(self, ctx: &'static str) -> Self;
        fn with_owned_context<T: Into<String>>(self, ctx: T) -> Self;
}
impl<T> WaErrorContext for Result<T> {
        fn with_context(self, ctx: &'static str) -> Self {
                self.map_err(|e| {
                        WaError::Context(ctx, Box::new(e))
                })
        }
        fn with_owned_context<U: Into<String>>(self, ctx: U) -> Self {
                self.map_err(|e| {
                        WaError::OwnedContext(ctx.into(), Box::new(e))
                })
        }
}

/// Why a connection went away. Carried by `UnexpectedDisconnect`, the
/// `close`/`ws-close` events, and the errors handed to rejected waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
        /// Another device took over this session (server-initiated).
        Replaced,
        /// The server rejected our credentials; do not retry them.
        InvalidSession,
        /// A reply carried HTTP-like status 599.
        BadSession,
        /// The idle-debounce timer expired with no traffic.
        TimedOut,
        /// The caller asked us to close (`Close`/`Logout`).
        Intentional,
        /// Any other socket loss (connect failure, abnormal close, ...).
        Transport,
}

#[derive(Debug, Fail)]
pub enum WaError {
        #[fail(display = "I/O error: {}", _0)]
        Io(io::Error),
        #[fail(display = "WebSocket error: {}", _0)]
        Websocket(tokio_tungstenite::tungstenite::Error),
        #[fail(display = "Crypto error: {}", _0)]
        Crypto(ring::error::Unspecified),
        #[fail(display = "reqwest error: {}", _0)]
        Reqwest(reqwest::Error),
        #[fail(display = "http error code {}, message: {}", _0, _1)]
        HttpError(u16, String),
        #[fail(display = "JSON error: {}", _0)]
        Json(json::Error),
        #[fail(display = "JSON error: {}", _0)]
        SerdeJson(serde_json::Error),
        #[fail(display = "base64 decode error: {}", _0)]
        Base64(base64::DecodeError),
        #[fail(display = "Missing node attribute \"{}\"", _0)]
        NodeAttributeMissing(&'static str),
        #[fail(display = "Missing JSON field \"{}\"", _0)]
        JsonFieldMissing(&'static str),
        #[fail(display = "while {}: {}", _0, _1)]
        Context(&'static str, Box<WaError>),
        #[fail(display = "while {}: {}", _0, _1)]
        OwnedContext(String, Box<WaError>),
        #[fail(display = "invalid payload for {}: got {}", _0, _1)]
        InvalidPayload(String, &'static str),
        #[fail(display = "invalid session state for message")]
        InvalidSessionState,
        #[fail(display = "connection timed out")]
        Timeout,
        #[fail(display = "websocket disconnected")]
        WebsocketDisconnected,
        #[fail(display = "connection closed, code {}", _0)]
        Closed(u16),
        #[fail(display = "duplicate tag \"{}\"", _0)]
        DuplicateTag(String),
        #[fail(display = "not connected")]
        NotConnected,
        #[fail(display = "bad session (server sent status 599)")]
        BadSession,
        #[fail(display = "invalid session; credentials were rejected")]
        InvalidSession,
        #[fail(display = "replaced by another device")]
        Replaced,
        #[fail(display = "connection closed intentionally")]
        Intentional,
        #[fail(display = "server returned status {} ({}) for query {}", status, status_text, query)]
        ServerError { status: u16, status_text: String, query: String },
        #[fail(display = "HMAC verification failed")]
        BadMac,
        #[fail(display = "invalid padding while decrypting")]
        BadPadding,
        #[fail(display = "{}", _0)]
        UntypedOwned(String),
        #[fail(display = "{}", _0)]
        Untyped(&'static str)
}

pub type WaResult<T> = ::std::result::Result<T, WaError>;
// FIXME: to avoid changing all the damn result types everywhere
pub(crate) type Result<T> = WaResult<T>;

impl_from_for_error!(WaError,
                     Io => io::Error,
                     Websocket => tokio_tungstenite::tungstenite::Error,
                     Crypto => ring::error::Unspecified,
                     Reqwest => reqwest::Error,
                     Json => json::Error,
                     SerdeJson => serde_json::Error,
                     Base64 => base64::DecodeError,
                     UntypedOwned => String,
                     Untyped => &'static str);

impl From<DisconnectReason> for WaError {
        fn from(reason: DisconnectReason) -> WaError {
                match reason {
                        DisconnectReason::Replaced => WaError::Replaced,
                        DisconnectReason::InvalidSession => WaError::InvalidSession,
                        DisconnectReason::BadSession => WaError::BadSession,
                        DisconnectReason::TimedOut => WaError::Timeout,
                        DisconnectReason::Intentional => WaError::Intentional,
                        DisconnectReason::Transport => WaError::WebsocketDisconnected,
                }
        }
}
