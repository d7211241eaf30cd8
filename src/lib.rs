#[macro_use] extern crate log;
#[macro_use] extern crate json;
#[macro_use] extern crate serde_derive;
#[macro_use] extern crate failure;

#[macro_use] pub mod errors;
pub mod auth;
mod correlator;
pub mod conn;
mod crypto;
pub mod events;
pub mod framer;
pub mod http;
mod liveness;
mod node;
pub mod query;
pub mod state;
mod tagger;

use std::fmt;
use std::str::FromStr;

use crate::errors::Result;

pub use crate::auth::{base64_encoded_auth_info, load_auth_info, AuthInfo, BaseEncodedAuthInfo};
pub use crate::conn::{ConnectOptions, Connection};
pub use crate::correlator::InboundPayload;
pub use crate::errors::{DisconnectReason, WaError, WaResult};
pub use crate::events::{Event, EventBus, SubscriptionId};
pub use crate::framer::{Flag, Metric};
pub use crate::http::is_on_whatsapp_no_conn;
pub use crate::query::{set_query, Query};
pub use crate::state::{AutoReconnect, ConnectionState};

/// Identifies an individual or a group.
#[derive(Debug, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct Jid {
    pub id: String,
    pub is_group: bool,
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = if self.is_group { "@g.us" } else { "@s.whatsapp.net" };
        write!(f, "{}{}", self.id, suffix)
    }
}

impl Jid {
    /// If the Jid is from an individual, the international phone number.
    pub fn phonenumber(&self) -> Option<String> {
        if !self.is_group {
            Some(format!("+{}", self.id))
        } else {
            None
        }
    }
}

impl FromStr for Jid {
    type Err = errors::WaError;

    fn from_str(jid: &str) -> Result<Jid> {
        let at = jid.find('@').ok_or("jid missing @")?;
        let (id, suffix) = jid.split_at(at);
        Ok(Jid {
            id: id.to_string(),
            is_group: match suffix {
                "@g.us" => true,
                "@s.whatsapp.net" | "@c.us" | "@broadcast" => false,
                _ => return Err("invalid jid suffix".into()),
            },
        })
    }
}
