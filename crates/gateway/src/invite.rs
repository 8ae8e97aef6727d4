//! Invite tokens: base64 JSON carrying a provider credential and/or a room.
//!
//! Wire shape of the decoded JSON:
//!
//! ```json
//! { "k": { "provider": "groq", "key": "gsk_...", "model": "..." }, "r": "lab" }
//! ```
//!
//! Both fields are optional and unknown fields are ignored. In a link the
//! token travels as the `s` query parameter.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use proto::{InviteError, is_valid_room};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Query parameter that carries the invite token.
pub const INVITE_PARAM: &str = "s";

/// Provider credential carried by an invite.
#[derive(Clone, PartialEq, Eq)]
pub struct InviteCredential {
    /// Provider id.
    pub provider: String,
    /// API key for the provider.
    pub key: String,
    /// Optional model to select alongside the key.
    pub model: Option<String>,
}

impl std::fmt::Debug for InviteCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InviteCredential")
            .field("provider", &self.provider)
            .field("key", &proto::mask_secret(&self.key))
            .field("model", &self.model)
            .finish()
    }
}

/// Decoded invite contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InviteBundle {
    /// Credential to merge into the credential store on unlock.
    pub credential: Option<InviteCredential>,
    /// Room to join instead of the default.
    pub room_override: Option<String>,
}

impl InviteBundle {
    /// True when the invite carries nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.credential.is_none() && self.room_override.is_none()
    }

    /// Encodes the bundle as a standard base64 token.
    pub fn encode(&self) -> String {
        let wire = InviteWire {
            k: self.credential.as_ref().map(|c| CredentialWire {
                provider: c.provider.clone(),
                key: c.key.clone(),
                model: c.model.clone(),
            }),
            r: self.room_override.clone(),
        };
        // Serializing plain strings cannot fail.
        let json = serde_json::to_vec(&wire).unwrap_or_default();
        STANDARD.encode(json)
    }
}

/// Builds a share link: `base` with the token appended as the `s` parameter.
pub fn invite_url(base: &str, bundle: &InviteBundle) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{base}{separator}{INVITE_PARAM}={}",
        percent_encode(&bundle.encode())
    )
}

#[derive(Debug, Serialize, Deserialize)]
struct InviteWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    k: Option<CredentialWire>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    r: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CredentialWire {
    #[serde(default)]
    provider: String,
    #[serde(default)]
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
}

/// Fail-soft invite parser. Every entry point returns `None` on any problem.
pub struct InviteDecoder;

impl InviteDecoder {
    /// Decodes a bare token.
    pub fn decode(token: &str) -> Option<InviteBundle> {
        Self::try_decode(token)
            .inspect_err(|e| debug!("Ignoring invite token: {e}"))
            .ok()
    }

    /// Decodes the `s` parameter of a full link.
    pub fn from_url(url: &str) -> Option<InviteBundle> {
        query_param(url, INVITE_PARAM)
            .and_then(|token| Self::try_decode(&token))
            .inspect_err(|e| debug!("Ignoring invite link: {e}"))
            .ok()
    }

    /// Accepts either a link or a bare token (command line / env input).
    pub fn from_argument(arg: &str) -> Option<InviteBundle> {
        let arg = arg.trim();
        if arg.contains('?') || arg.contains("://") {
            Self::from_url(arg)
        } else {
            Self::decode(arg)
        }
    }

    /// Strict decode used by the fail-soft entry points.
    pub fn try_decode(token: &str) -> Result<InviteBundle, InviteError> {
        // Form decoding turns '+' into ' '; put them back before base64.
        let token: String = token
            .trim()
            .chars()
            .map(|c| if c == ' ' { '+' } else { c })
            .collect();
        if token.is_empty() {
            return Err(InviteError::MissingParameter);
        }
        let bytes = decode_base64(&token)?;
        let wire: InviteWire =
            serde_json::from_slice(&bytes).map_err(|e| InviteError::Json(e.to_string()))?;
        Ok(bundle_from_wire(wire))
    }
}

fn decode_base64(token: &str) -> Result<Vec<u8>, InviteError> {
    let mut last_err = None;
    for engine in [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD] {
        match engine.decode(token) {
            Ok(bytes) => return Ok(bytes),
            Err(e) => last_err = Some(e),
        }
    }
    Err(InviteError::Base64(
        last_err.map(|e| e.to_string()).unwrap_or_default(),
    ))
}

fn bundle_from_wire(wire: InviteWire) -> InviteBundle {
    let credential = wire.k.and_then(|k| {
        let provider = k.provider.trim().to_string();
        let key = k.key.trim().to_string();
        if provider.is_empty() || key.is_empty() {
            debug!("Dropping invite credential with empty provider or key");
            return None;
        }
        let model = k
            .model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        Some(InviteCredential {
            provider,
            key,
            model,
        })
    });
    let room_override = wire
        .r
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .filter(|r| {
            let valid = is_valid_room(r);
            if !valid {
                debug!(room = %r, "Dropping invite room that is not a topic segment");
            }
            valid
        });
    InviteBundle {
        credential,
        room_override,
    }
}

/// Extracts and percent-decodes a query parameter from a URL.
fn query_param(url: &str, name: &str) -> Result<String, InviteError> {
    let query = url
        .split_once('?')
        .map(|(_, q)| q)
        .ok_or(InviteError::MissingParameter)?;
    let query = query.split('#').next().unwrap_or_default();
    query
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| percent_decode(v))
        .ok_or(InviteError::MissingParameter)
}

/// Percent-encodes a string for use in URL query parameters (RFC 3986).
fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Percent-decodes a query-string value (`%XX` sequences and `+` → space).
fn percent_decode(s: &str) -> String {
    let mut out = Vec::with_capacity(s.len());
    let mut bytes = s.bytes();
    while let Some(b) = bytes.next() {
        match b {
            b'%' => {
                let hex: Vec<u8> = bytes.by_ref().take(2).collect();
                match std::str::from_utf8(&hex)
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                {
                    Some(byte) => out.push(byte),
                    None => {
                        out.push(b'%');
                        out.extend_from_slice(&hex);
                    }
                }
            }
            b'+' => out.push(b' '),
            other => out.push(other),
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
