use serde_derive::{Deserialize, Serialize};

use crate::errors::{WaError, WaResult};

/// Session credentials. A binary frame may be sent only while this is
/// present (enforced by the Crypto Envelope call sites, not here).
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub client_id: String,
    pub server_token: String,
    pub client_token: String,
    pub enc_key: [u8; 32],
    pub mac_key: [u8; 32],
}

/// The five-field base64 export shape, `enc_key`/`mac_key` base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseEncodedAuthInfo {
    pub client_id: String,
    pub server_token: String,
    pub client_token: String,
    pub enc_key: String,
    pub mac_key: String,
}

/// A key as it appears in the modern bootstrap shape: either base64-encoded,
/// or the raw `[u8; 32]` JSON array serde itself would have produced.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum KeyMaterial {
    Base64(String),
    Raw(Vec<u8>),
}

impl KeyMaterial {
    fn into_key(self) -> WaResult<[u8; 32]> {
        match self {
            KeyMaterial::Base64(s) => decode_key(&s),
            KeyMaterial::Raw(bytes) => {
                if bytes.len() != 32 {
                    return Err(WaError::InvalidPayload(
                        format!("{} raw bytes", bytes.len()),
                        "32-byte key",
                    ));
                }
                let mut key = [0u8; 32];
                key.copy_from_slice(&bytes);
                Ok(key)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModernShape {
    client_id: String,
    server_token: String,
    client_token: String,
    enc_key: KeyMaterial,
    mac_key: KeyMaterial,
}

#[derive(Debug, Deserialize)]
struct LegacyShape {
    #[serde(rename = "WABrowserId")]
    wa_browser_id: String,
    #[serde(rename = "WAToken1")]
    wa_token1: String,
    #[serde(rename = "WAToken2")]
    wa_token2: String,
    #[serde(rename = "WASecretBundle")]
    wa_secret_bundle: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SecretBundle {
    #[serde(rename = "encKey")]
    enc_key: String,
    #[serde(rename = "macKey")]
    mac_key: String,
}

/// Accepts either the modern five-field shape or the legacy
/// `{WABrowserId, WAToken1, WAToken2, WASecretBundle}` export, stripping
/// literal embedded double quotes from the legacy ID/token fields (a known
/// quirk of bootstrap files hand-exported from browser local storage).
pub fn load_auth_info(bytes: &[u8]) -> WaResult<AuthInfo> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;

    if value.get("client_id").is_some() {
        let modern: ModernShape = serde_json::from_value(value)?;
        return Ok(AuthInfo {
            client_id: modern.client_id,
            server_token: modern.server_token,
            client_token: modern.client_token,
            enc_key: modern.enc_key.into_key()?,
            mac_key: modern.mac_key.into_key()?,
        });
    }

    let legacy: LegacyShape = serde_json::from_value(value)?;
    let bundle: SecretBundle = match legacy.wa_secret_bundle {
        serde_json::Value::String(s) => serde_json::from_str(&s)?,
        other => serde_json::from_value(other)?,
    };

    Ok(AuthInfo {
        client_id: strip_quotes(&legacy.wa_browser_id),
        server_token: strip_quotes(&legacy.wa_token2),
        client_token: strip_quotes(&legacy.wa_token1),
        enc_key: decode_key(&bundle.enc_key)?,
        mac_key: decode_key(&bundle.mac_key)?,
    })
}

pub fn base64_encoded_auth_info(auth: &AuthInfo) -> BaseEncodedAuthInfo {
    BaseEncodedAuthInfo {
        client_id: auth.client_id.clone(),
        server_token: auth.server_token.clone(),
        client_token: auth.client_token.clone(),
        enc_key: base64::encode(&auth.enc_key),
        mac_key: base64::encode(&auth.mac_key),
    }
}

fn strip_quotes(s: &str) -> String {
    s.chars().filter(|&c| c != '"').collect()
}

fn decode_key(s: &str) -> WaResult<[u8; 32]> {
    let bytes = base64::decode(s)?;
    let mut key = [0u8; 32];
    if bytes.len() != 32 {
        return Err(WaError::InvalidPayload(s.to_owned(), "32-byte key"));
    }
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64_32(byte: u8) -> String {
        base64::encode(&[byte; 32])
    }

    #[test]
    fn parses_modern_shape() {
        let json = format!(
            r#"{{"client_id":"cid","server_token":"st","client_token":"ct","enc_key":"{}","mac_key":"{}"}}"#,
            b64_32(1),
            b64_32(2)
        );
        let auth = load_auth_info(json.as_bytes()).unwrap();
        assert_eq!(auth.client_id, "cid");
        assert_eq!(auth.enc_key, [1u8; 32]);
        assert_eq!(auth.mac_key, [2u8; 32]);
    }

    #[test]
    fn parses_modern_shape_with_raw_byte_array_keys() {
        let enc: Vec<u8> = vec![1u8; 32];
        let mac: Vec<u8> = vec![2u8; 32];
        let json = format!(
            r#"{{"client_id":"cid","server_token":"st","client_token":"ct","enc_key":{:?},"mac_key":{:?}}}"#,
            enc, mac
        );
        let auth = load_auth_info(json.as_bytes()).unwrap();
        assert_eq!(auth.enc_key, [1u8; 32]);
        assert_eq!(auth.mac_key, [2u8; 32]);
    }

    #[test]
    fn parses_legacy_shape_and_strips_quotes() {
        let json = format!(
            r#"{{"WABrowserId":"\"cid\"","WAToken1":"\"ct\"","WAToken2":"\"st\"","WASecretBundle":"{{\"encKey\":\"{}\",\"macKey\":\"{}\"}}"}}"#,
            b64_32(3),
            b64_32(4)
        );
        let auth = load_auth_info(json.as_bytes()).unwrap();
        assert_eq!(auth.client_id, "cid");
        assert_eq!(auth.client_token, "ct");
        assert_eq!(auth.server_token, "st");
        assert_eq!(auth.enc_key, [3u8; 32]);
        assert_eq!(auth.mac_key, [4u8; 32]);
    }

    #[test]
    fn round_trips_through_base64_export() {
        let auth = AuthInfo {
            client_id: "cid".into(),
            server_token: "st".into(),
            client_token: "ct".into(),
            enc_key: [9u8; 32],
            mac_key: [8u8; 32],
        };
        let exported = base64_encoded_auth_info(&auth);
        let reloaded = load_auth_info(serde_json::to_string(&exported).unwrap().as_bytes()).unwrap();
        assert_eq!(reloaded.enc_key, auth.enc_key);
        assert_eq!(reloaded.mac_key, auth.mac_key);
    }
}
