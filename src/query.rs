use std::time::Duration;

use json::JsonValue;

use crate::framer::{Flag, Metric};

/// A single request/response exchange over the connection. Constructed by
/// callers (directly, or via `set_query`) and executed by
/// `Connection::query`.
#[derive(Debug, Clone)]
pub struct Query {
    pub json: JsonValue,
    pub binary_flags: Option<(Metric, Flag)>,
    pub tag: Option<String>,
    pub timeout: Option<Duration>,
    pub expect_2xx: bool,
    pub wait_for_open: bool,
    pub long_tag: bool,
    pub requires_phone: bool,
    pub start_debounce: bool,
    /// Set by `set_query`: the raw `nodes` payload still awaiting its
    /// `["action", {epoch, type: "set"}, nodes]` envelope. Left `None` for
    /// plain queries. The actor resolves this into `json` with the live
    /// `msg_count` at the moment it actually sends the frame, rather than
    /// whatever `msg_count` happened to be when the caller built this
    /// `Query` (which may be stale by the time it reaches the actor).
    pub(crate) pending_action_nodes: Option<JsonValue>,
}

impl Default for Query {
    fn default() -> Self {
        Query {
            json: JsonValue::Null,
            binary_flags: None,
            tag: None,
            timeout: None,
            expect_2xx: false,
            wait_for_open: true,
            long_tag: false,
            requires_phone: true,
            start_debounce: false,
            pending_action_nodes: None,
        }
    }
}

/// Builds the `["action", {epoch, type: "set"}, nodes]` envelope the server
/// expects for mutating "set" requests, with `epoch` resolved at the point
/// of actual send.
pub(crate) fn build_action_envelope(nodes: JsonValue, epoch: u64) -> JsonValue {
    json::array![
        "action",
        json::object! {
            "epoch" => epoch.to_string(),
            "type" => "set"
        },
        nodes
    ]
}

/// A mutating "set" request. `nodes` is wrapped in the action envelope by
/// the actor at send time, so the embedded epoch always reflects the live
/// `msg_count` rather than whatever it was when this `Query` was built.
pub fn set_query(nodes: JsonValue, flags: (Metric, Flag), tag: Option<String>) -> Query {
    Query {
        pending_action_nodes: Some(nodes),
        binary_flags: Some(flags),
        tag,
        expect_2xx: true,
        requires_phone: true,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_query_defers_the_action_envelope_to_send_time() {
        let nodes = json::array!["ignore-me"];
        let q = set_query(nodes, (Metric::Group, Flag::Ignore), None);
        assert!(q.pending_action_nodes.is_some());
        assert!(q.json.is_null());
        assert!(q.expect_2xx);
        assert!(q.requires_phone);
        assert_eq!(q.binary_flags, Some((Metric::Group, Flag::Ignore)));
    }

    #[test]
    fn build_action_envelope_embeds_the_given_epoch() {
        let nodes = json::array![];
        let envelope = build_action_envelope(nodes, 7);
        assert_eq!(envelope[0], "action");
        assert_eq!(envelope[1]["type"], "set");
        assert_eq!(envelope[1]["epoch"], "7");
    }

    #[test]
    fn default_query_waits_for_open_and_uses_short_tag() {
        let q = Query::default();
        assert!(q.wait_for_open);
        assert!(!q.long_tag);
        assert!(q.requires_phone);
        assert!(!q.start_debounce);
    }
}
