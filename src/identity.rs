use actix_web::http::header;
use actix_web::HttpRequest;
use jsonwebtoken::{decode, DecodingKey, Validation};
use log::{debug, error};
use serde_json::Value;

use crate::config::Config;
use crate::errors::ChatError;
use crate::models::Role;

/// Normalized caller identity, produced fresh per connection from a verified
/// token. Lives for the socket's lifetime and is never persisted.
#[derive(Debug, Clone)]
pub struct Identity {
    /// 24-char hex user id (or whatever plausible id the token carried).
    pub id: String,
    pub role: Role,
    pub name: String,
}

/// Bound on recursion through nested `user`/`_id`/`id`/`sub` claims.
const MAX_ID_RECURSION: usize = 8;

/// Length of a hex-rendered ObjectId; legacy byte payloads must decode to
/// exactly this.
const OBJECT_ID_HEX_LEN: usize = 24;

/// Resolves the connecting client's identity from the upgrade request.
///
/// Token sources in precedence order: the configured session cookie, the
/// handshake auth field (`token` query parameter), then a `Bearer`
/// authorization header. First non-empty source wins.
pub fn authenticate(
    req: &HttpRequest,
    auth_field: Option<&str>,
    config: &Config,
) -> Result<Identity, ChatError> {
    let cookie = req.cookie(&config.session_cookie);
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let token = select_token(
        cookie.as_ref().map(|c| c.value()),
        auth_field,
        authorization,
    )?;
    let claims = decode_token(&token, &config.jwt_secret)?;
    resolve_identity(&claims)
}

pub fn select_token(
    cookie: Option<&str>,
    auth_field: Option<&str>,
    authorization: Option<&str>,
) -> Result<String, ChatError> {
    if let Some(value) = cookie.filter(|v| !v.is_empty()) {
        return Ok(value.to_string());
    }
    if let Some(value) = auth_field.filter(|v| !v.is_empty()) {
        return Ok(value.to_string());
    }
    if let Some(header) = authorization {
        if let Some(bearer) = header.strip_prefix("Bearer ") {
            let bearer = bearer.trim();
            if !bearer.is_empty() {
                return Ok(bearer.to_string());
            }
        }
    }
    Err(ChatError::NoToken)
}

/// Verifies signature and expiry (HS256, `exp` required) and hands back the
/// raw claims. The payload is kept as loose JSON because its shape has
/// changed across token-issuer versions; `resolve_identity` sorts that out.
pub fn decode_token(token: &str, secret: &str) -> Result<Value, ChatError> {
    decode::<Value>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        debug!("token verification failed: {}", e);
        ChatError::InvalidToken
    })
}

/// Normalizes any of the known claim shapes into an `Identity`.
///
/// Shapes, in precedence order: a flat payload carrying `id`/`_id`, a nested
/// `user` object with the same fields, and legacy binary ids (an object of
/// byte-indexed fields or a `data` byte array) which are reconstituted into
/// the canonical 24-hex form. Anything else is `NoIdentity`.
pub fn resolve_identity(claims: &Value) -> Result<Identity, ChatError> {
    let id = match extract_id(claims, 0) {
        Some(id) => id,
        None => {
            error!("no valid user id in token payload: {}", claims);
            return Err(ChatError::NoIdentity);
        }
    };

    let role = claim_field(claims, "role")
        .map(|r| Role::from(r.as_str()))
        .unwrap_or_default();
    let name = claim_field(claims, "name").unwrap_or_else(|| "User".to_string());

    Ok(Identity { id, role, name })
}

/// Reads a string claim either flat or nested under `user`.
fn claim_field(claims: &Value, key: &str) -> Option<String> {
    claims
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .or_else(|| {
            claims
                .get("user")
                .and_then(|u| u.get(key))
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
}

fn extract_id(value: &Value, depth: usize) -> Option<String> {
    if depth > MAX_ID_RECURSION {
        return None;
    }

    match value {
        Value::String(s) => {
            if plausible_id(s) {
                Some(s.clone())
            } else {
                None
            }
        }
        Value::Object(map) => {
            // Legacy tokens wrap the raw id bytes one or two levels down;
            // retarget through the usual suspects before probing for bytes.
            let target = map
                .get("buffer")
                .or_else(|| map.get("_id"))
                .or_else(|| map.get("id"))
                .unwrap_or(value);
            let buffer_obj = match target.get("buffer") {
                Some(inner) => inner,
                None => target,
            };
            if let Some(hex) = decode_byte_fields(buffer_obj) {
                if hex.len() == OBJECT_ID_HEX_LEN {
                    return Some(hex);
                }
            }

            for key in ["user", "_id", "id", "sub"] {
                if let Some(inner) = map.get(key) {
                    if let Some(id) = extract_id(inner, depth + 1) {
                        return Some(id);
                    }
                }
            }
            None
        }
        _ => None,
    }
}

/// Rejects the string a careless issuer produces by stringifying an object,
/// and anything too short to be an identifier.
fn plausible_id(s: &str) -> bool {
    s != "[object Object]" && s.len() > 5
}

/// Decodes `{"0": 80, "1": 127, ...}` or `{"data": [80, 127, ...]}` into a
/// lowercase hex string. Byte-indexed fields are ordered by their numeric
/// key; JSON object key order cannot be relied on.
fn decode_byte_fields(value: &Value) -> Option<String> {
    let map = value.as_object()?;
    if !map.contains_key("0") && !map.contains_key("data") {
        return None;
    }

    let bytes: Vec<u8> = if let Some(data) = map.get("data") {
        data.as_array()?
            .iter()
            .map(|v| v.as_u64().and_then(|b| u8::try_from(b).ok()))
            .collect::<Option<_>>()?
    } else {
        let mut indexed: Vec<(usize, u8)> = map
            .iter()
            .filter_map(|(k, v)| {
                let index = k.parse().ok()?;
                let byte = v.as_u64().and_then(|b| u8::try_from(b).ok())?;
                Some((index, byte))
            })
            .collect();
        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, byte)| byte).collect()
    };

    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in &bytes {
        hex.push_str(&format!("{:02x}", byte));
    }
    Some(hex)
}
