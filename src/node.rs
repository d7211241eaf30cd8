use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use json::JsonValue;
use std::io::Cursor;

use crate::errors::{WaError, WaResult};

/// The minimal structural contract the binary codec needs from the node
/// tree: a tag, string attributes, and either child nodes or a raw byte
/// payload. This is not the real token-dictionary compression WhatsApp
/// uses on the wire; that belongs to the external chat-decoding module.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Node {
    pub(crate) tag: String,
    pub(crate) attrs: Vec<(String, String)>,
    pub(crate) content: NodeContent,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum NodeContent {
    Children(Vec<Node>),
    Bytes(Vec<u8>),
    None,
}

impl Node {
    /// Converts a `[tag, attrs_obj, children]` JSON triple (as used by
    /// `set_query`'s `["action", {...}, nodes]` shape) into a `Node`.
    pub(crate) fn from_json(value: &JsonValue) -> WaResult<Node> {
        if !value.is_array() || value.len() != 3 {
            return Err(WaError::InvalidPayload(
                value.to_string(),
                "3-element [tag, attrs, children] array",
            ));
        }
        let tag = value[0]
            .as_str()
            .ok_or(WaError::InvalidPayload(value.to_string(), "string tag"))?
            .to_owned();

        let mut attrs = Vec::new();
        if !value[1].is_null() {
            for (k, v) in value[1].entries() {
                let value = v.as_str().map(str::to_owned).unwrap_or_else(|| v.to_string());
                attrs.push((k.to_owned(), value));
            }
        }

        let content = match &value[2] {
            JsonValue::Array(children) => {
                let mut nodes = Vec::with_capacity(children.len());
                for child in children {
                    nodes.push(Node::from_json(child)?);
                }
                NodeContent::Children(nodes)
            }
            JsonValue::Null => NodeContent::None,
            other => NodeContent::Bytes(other.to_string().into_bytes()),
        };

        Ok(Node { tag, attrs, content })
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_string(&mut out, &self.tag);
        write_u32(&mut out, self.attrs.len() as u32);
        for (k, v) in &self.attrs {
            write_string(&mut out, k);
            write_string(&mut out, v);
        }
        match &self.content {
            NodeContent::Children(children) => {
                out.push(1);
                write_u32(&mut out, children.len() as u32);
                for child in children {
                    let encoded = child.encode();
                    write_u32(&mut out, encoded.len() as u32);
                    out.extend(encoded);
                }
            }
            NodeContent::Bytes(bytes) => {
                out.push(2);
                write_u32(&mut out, bytes.len() as u32);
                out.extend(bytes);
            }
            NodeContent::None => {
                out.push(0);
            }
        }
        out
    }

    pub(crate) fn decode(bytes: &[u8]) -> WaResult<Node> {
        let mut cursor = Cursor::new(bytes);
        decode_from(&mut cursor)
    }
}

fn decode_from(cursor: &mut Cursor<&[u8]>) -> WaResult<Node> {
    let tag = read_string(cursor)?;
    let attr_count = read_u32(cursor)? as usize;
    let mut attrs = Vec::with_capacity(attr_count);
    for _ in 0..attr_count {
        let k = read_string(cursor)?;
        let v = read_string(cursor)?;
        attrs.push((k, v));
    }

    let kind = cursor
        .read_u8()
        .map_err(|_| WaError::Untyped("truncated node: missing content tag"))?;
    let content = match kind {
        1 => {
            let child_count = read_u32(cursor)? as usize;
            let mut children = Vec::with_capacity(child_count);
            for _ in 0..child_count {
                let len = read_u32(cursor)? as usize;
                let start = cursor.position() as usize;
                let end = start + len;
                let slice = cursor
                    .get_ref()
                    .get(start..end)
                    .ok_or(WaError::Untyped("truncated node: child out of bounds"))?;
                children.push(Node::decode(slice)?);
                cursor.set_position(end as u64);
            }
            NodeContent::Children(children)
        }
        2 => {
            let len = read_u32(cursor)? as usize;
            let mut bytes = vec![0u8; len];
            std::io::Read::read_exact(cursor, &mut bytes)
                .map_err(|_| WaError::Untyped("truncated node: bytes content"))?;
            NodeContent::Bytes(bytes)
        }
        0 => NodeContent::None,
        _ => return Err(WaError::Untyped("unknown node content tag")),
    };

    Ok(Node { tag, attrs, content })
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    write_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

fn write_u32(out: &mut Vec<u8>, n: u32) {
    out.write_u32::<BigEndian>(n).expect("Vec<u8> write cannot fail");
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> WaResult<u32> {
    cursor
        .read_u32::<BigEndian>()
        .map_err(|_| WaError::Untyped("truncated node: expected u32 length"))
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> WaResult<String> {
    let len = read_u32(cursor)? as usize;
    let mut bytes = vec![0u8; len];
    std::io::Read::read_exact(cursor, &mut bytes)
        .map_err(|_| WaError::Untyped("truncated node: expected string bytes"))?;
    String::from_utf8(bytes).map_err(|_| WaError::Untyped("node string is not valid utf-8"))
}
