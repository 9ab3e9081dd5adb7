//! Outbound command payloads.
//!
//! Every command is a JSON object `{"m": method, "p": [args..]}`. The
//! authenticated variant puts the quote session id in front of the arguments.
//! The returned strings are bare payloads; wrap them with
//! [`framing::encode`](crate::framing::encode) before sending.

use rand::seq::SliceRandom;
use serde_json::{Value, json};

/// Prefix of every quote session id.
pub const SESSION_ID_PREFIX: &str = "qs_";

/// Number of random letters after the prefix.
pub const SESSION_ID_LETTERS: usize = 12;

/// Build a bare command payload.
pub fn bare(method: &str, args: Vec<Value>) -> String {
    json!({ "m": method, "p": args }).to_string()
}

/// Build a command payload whose first argument is the session id.
pub fn authenticated(method: &str, session_id: &str, args: Vec<Value>) -> String {
    let mut params = Vec::with_capacity(args.len() + 1);
    params.push(Value::from(session_id));
    params.extend(args);
    bare(method, params)
}

/// `set_auth_token`: first command of the handshake.
pub fn set_auth_token(token: &str) -> String {
    bare("set_auth_token", vec![Value::from(token)])
}

/// `quote_create_session`: opens the quote session named by `session_id`.
pub fn quote_create_session(session_id: &str) -> String {
    authenticated("quote_create_session", session_id, vec![])
}

/// `quote_set_fields`: selects which fields the server streams.
pub fn quote_set_fields<S: AsRef<str>>(session_id: &str, fields: &[S]) -> String {
    let args = fields.iter().map(|f| Value::from(f.as_ref())).collect();
    authenticated("quote_set_fields", session_id, args)
}

/// `quote_add_symbols`: subscribes one symbol.
pub fn quote_add_symbols(session_id: &str, symbol: &str) -> String {
    authenticated(
        "quote_add_symbols",
        session_id,
        vec![Value::from(symbol), json!({ "flags": ["force_permission"] })],
    )
}

/// Generate a fresh session id: `qs_` plus 12 distinct lowercase letters.
pub fn generate_session_id() -> String {
    let mut letters: Vec<char> = ('a'..='z').collect();
    letters.shuffle(&mut rand::rng());
    let suffix: String = letters.into_iter().take(SESSION_ID_LETTERS).collect();
    format!("{SESSION_ID_PREFIX}{suffix}")
}
