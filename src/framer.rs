use crate::crypto;
use crate::errors::{WaError, WaResult};
use crate::node::Node;

/// Server-defined routing metric, one byte on the wire. Variants and
/// discriminants mirror the set the teacher's `req.rs` dispatches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Metric {
    Picture = 1,
    Read = 2,
    Chat = 3,
    Received = 4,
    Group = 5,
    Presence = 6,
    Message = 7,
    QueryMessages = 8,
    QueryContact = 9,
    QueryStatus = 10,
    Block = 11,
    Status = 12,
    Profile = 13,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Flag {
    Ignore = 0,
    Available = 1,
    Unavailable = 2,
    Expires = 3,
    SkipOffline = 4,
}

/// Parsed shape of an inbound frame: the tag is always present; the rest is
/// either a JSON payload or a sealed binary payload still needing `open`.
pub(crate) enum ParsedFrame {
    Json(String, json::JsonValue),
    Binary(String, Vec<u8>),
}

pub(crate) fn frame_json(tag: &str, payload: &json::JsonValue) -> Vec<u8> {
    format!("{},{}", tag, payload.dump()).into_bytes()
}

pub(crate) fn frame_binary_outbound(
    tag: &str,
    node: &Node,
    metric: Metric,
    flag: Flag,
    enc_key: &[u8; 32],
    mac_key: &[u8; 32],
) -> WaResult<Vec<u8>> {
    let sealed = crypto::seal(&node.encode(), enc_key, mac_key)?;
    let mut out = Vec::with_capacity(tag.len() + 3 + sealed.len());
    out.extend_from_slice(tag.as_bytes());
    out.push(b',');
    out.push(metric as u8);
    out.push(flag as u8);
    out.extend(sealed);
    Ok(out)
}

/// Symmetric framing with no metric/flag bytes, used only to exercise the
/// binary round-trip invariant (real binary replies never carry them).
#[cfg(test)]
pub(crate) fn frame_binary_reply(
    tag: &str,
    node: &Node,
    enc_key: &[u8; 32],
    mac_key: &[u8; 32],
) -> WaResult<Vec<u8>> {
    let sealed = crypto::seal(&node.encode(), enc_key, mac_key)?;
    let mut out = Vec::with_capacity(tag.len() + 1 + sealed.len());
    out.extend_from_slice(tag.as_bytes());
    out.push(b',');
    out.extend(sealed);
    Ok(out)
}

/// Splits `"<tag>,<rest>"` and classifies `rest` as JSON or raw bytes. JSON
/// payloads start with `{`, `[`, or an ASCII digit; anything else is binary.
pub(crate) fn parse_frame(bytes: &[u8]) -> WaResult<ParsedFrame> {
    let comma = bytes
        .iter()
        .position(|&b| b == b',')
        .ok_or(WaError::Untyped("frame missing tag separator"))?;
    let (tag_bytes, rest) = bytes.split_at(comma);
    let rest = &rest[1..];
    let tag = String::from_utf8(tag_bytes.to_vec())
        .map_err(|_| WaError::Untyped("frame tag is not valid utf-8"))?;

    match rest.first() {
        Some(b'{') | Some(b'[') | Some(b'0'..=b'9') => {
            let text = std::str::from_utf8(rest)
                .map_err(|_| WaError::Untyped("json payload is not valid utf-8"))?;
            let value = json::parse(text)?;
            Ok(ParsedFrame::Json(tag, value))
        }
        _ => Ok(ParsedFrame::Binary(tag, rest.to_vec())),
    }
}
