// ttp-protocol: TTP line grammar and command formatting.
//
// TTP is a newline-terminated text protocol. Every inbound line is exactly
// one of `+OK ...`, `-ERR ...`, or `! ...`; anything else (login banners,
// shell prompts, blank lines) is noise and never reaches higher layers.
//
// This crate is pure: a function from line text to a typed response, plus
// formatting helpers for the outbound command text. No I/O, no state.

mod value;

pub use value::Value;

use value::{Item, parse_items};

// ---------------------------------------------------------------------------
// Response model
// ---------------------------------------------------------------------------

/// A parsed inbound TTP line.
///
/// The original line text is kept verbatim in `raw` so callers that need the
/// exact device output (logging, diagnostics) can get it back.
#[derive(Debug, Clone, PartialEq)]
pub struct TtpResponse {
    pub kind: ResponseKind,
    pub raw: String,
}

/// The three line shapes the device emits.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseKind {
    /// `+OK ...` — success, with the decoded payload (Null when bare `+OK`).
    Ok(Value),
    /// `-ERR ...` — failure, with the free-form message text.
    Error(String),
    /// `! ...` — subscription push.
    Publish(Publish),
}

/// A subscription push frame.
///
/// `channel` is present only when the device included an `index=` field;
/// the subscription registry merges in the registered channel otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Publish {
    pub token: String,
    pub channel: Option<u32>,
    pub value: Value,
}

impl TtpResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self.kind, ResponseKind::Ok(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, ResponseKind::Error(_))
    }

    /// The error message, when this is an `-ERR` response.
    pub fn error_message(&self) -> Option<&str> {
        match &self.kind {
            ResponseKind::Error(msg) => Some(msg),
            _ => None,
        }
    }

    /// The decoded payload of an `+OK` or publish line.
    ///
    /// Devices answer attribute queries as a single-pair `value=...` record;
    /// that wrapper is peeled off here so callers always see the payload
    /// itself.
    pub fn value(&self) -> Option<&Value> {
        let v = match &self.kind {
            ResponseKind::Ok(v) => v,
            ResponseKind::Publish(p) => &p.value,
            ResponseKind::Error(_) => return None,
        };
        Some(unwrap_value_field(v))
    }
}

fn unwrap_value_field(v: &Value) -> &Value {
    if let Value::Record(pairs) = v
        && pairs.len() == 1
        && pairs[0].0 == "value"
    {
        return &pairs[0].1;
    }
    v
}

// ---------------------------------------------------------------------------
// Line parser
// ---------------------------------------------------------------------------

/// Parse one raw line into a typed response.
///
/// Returns `None` for protocol noise (any line not starting with `+OK`,
/// `-ERR`, or `!`) and for publish lines missing their `publishToken` field.
/// Trailing `\r` from CRLF transports is stripped before classification.
pub fn parse_line(line: &str) -> Option<TtpResponse> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let kind = if let Some(rest) = trimmed.strip_prefix("+OK") {
        ResponseKind::Ok(parse_payload(rest))
    } else if let Some(rest) = trimmed.strip_prefix("-ERR") {
        ResponseKind::Error(rest.trim().to_owned())
    } else if let Some(rest) = trimmed.strip_prefix('!') {
        ResponseKind::Publish(parse_publish(rest)?)
    } else {
        return None;
    };

    Some(TtpResponse {
        kind,
        raw: trimmed.to_owned(),
    })
}

/// Decode an `+OK` payload.
///
/// A run of `key=value` pairs decodes to a record; a single bare value to
/// that value; several bare values to a list; nothing to Null.
fn parse_payload(rest: &str) -> Value {
    Value::from_items(parse_items(rest))
}

fn parse_publish(rest: &str) -> Option<Publish> {
    let mut token = None;
    let mut channel = None;
    let mut value = Value::Null;
    for item in parse_items(rest) {
        match item {
            Item::Pair(key, v) => match key.as_str() {
                "publishToken" => token = v.as_str().map(str::to_owned),
                "index" => channel = v.as_int().and_then(|i| u32::try_from(i).ok()),
                "value" => value = v,
                _ => {}
            },
            Item::Plain(_) => {}
        }
    }
    Some(Publish {
        token: token?,
        channel,
        value,
    })
}

// ---------------------------------------------------------------------------
// Block-type inference from error text
// ---------------------------------------------------------------------------

/// Extract a block-type name from an `-ERR` message tail.
///
/// An intentionally invalid attribute query makes the device name the
/// handling interface in its error, e.g.
/// `-ERR Ducker GateInterface::Attributes` — the token after the last space
/// carries `<Type>Interface::Attributes`, so the block type here is `Gate`.
pub fn block_type_from_error(message: &str) -> Option<String> {
    let tail = message.split_whitespace().next_back()?;
    let name = tail.strip_suffix("Interface::Attributes")?.trim();
    if name.is_empty() {
        return None;
    }
    Some(name.to_owned())
}

// ---------------------------------------------------------------------------
// Outbound command formatting
// ---------------------------------------------------------------------------

/// One argument of a `set` command, serialized in wire form.
///
/// Booleans go lowercase, strings are double-quoted, numbers print plainly.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandArg {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl std::fmt::Display for CommandArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandArg::Bool(b) => write!(f, "{}", b),
            CommandArg::Int(i) => write!(f, "{}", i),
            CommandArg::Float(v) => write!(f, "{}", v),
            CommandArg::Str(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        }
    }
}

impl From<bool> for CommandArg {
    fn from(v: bool) -> Self {
        CommandArg::Bool(v)
    }
}

impl From<i64> for CommandArg {
    fn from(v: i64) -> Self {
        CommandArg::Int(v)
    }
}

impl From<u32> for CommandArg {
    fn from(v: u32) -> Self {
        CommandArg::Int(i64::from(v))
    }
}

impl From<f64> for CommandArg {
    fn from(v: f64) -> Self {
        CommandArg::Float(v)
    }
}

impl From<f32> for CommandArg {
    fn from(v: f32) -> Self {
        CommandArg::Float(f64::from(v))
    }
}

impl From<&str> for CommandArg {
    fn from(v: &str) -> Self {
        CommandArg::Str(v.to_owned())
    }
}

/// Format a `get` query: `<id> get <attr> [<channel>]`.
///
/// Query commands leave the block id bare unless it contains whitespace
/// (matches live device sessions; only state-changing commands always quote).
pub fn get_command(block_id: &str, attribute: &str, channel: Option<u32>) -> String {
    let id = if block_id.contains(char::is_whitespace) {
        format!("\"{}\"", block_id)
    } else {
        block_id.to_owned()
    };
    match channel {
        Some(ch) => format!("{} get {} {}", id, attribute, ch),
        None => format!("{} get {}", id, attribute),
    }
}

/// Format a `set` command: `"<id>" set <attr> [<channel>] <value>`.
///
/// Channel `0` is the device-level wildcard ("all channels") and is emitted
/// literally.
pub fn set_command(
    block_id: &str,
    attribute: &str,
    channel: Option<u32>,
    value: impl Into<CommandArg>,
) -> String {
    match channel {
        Some(ch) => format!("\"{}\" set {} {} {}", block_id, attribute, ch, value.into()),
        None => format!("\"{}\" set {} {}", block_id, attribute, value.into()),
    }
}

/// Format a `subscribe` command: `"<id>" subscribe <type> [<channel>] <token>`.
pub fn subscribe_command(
    block_id: &str,
    subscribe_type: &str,
    channel: Option<u32>,
    token: &str,
) -> String {
    match channel {
        Some(ch) => format!(
            "\"{}\" subscribe {} {} {}",
            block_id, subscribe_type, ch, token
        ),
        None => format!("\"{}\" subscribe {} {}", block_id, subscribe_type, token),
    }
}
