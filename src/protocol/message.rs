//! Message grammar: parse and render of control-plane lines.
//!
//! Lines are space-separated tokens. The collector additionally accepts
//! commas as separators in command lines. A `:` packs a `hostname:path`
//! sub-pair into a single argument.

use super::error::WireError;

/// A reply line sent by the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerReply {
    /// `HELLO <banner>` - first line after accept.
    Hello(String),
    /// `STREAMID <id>` - second line after accept.
    StreamId(String),
    /// `OK <arg>...` - command accepted or phase completed.
    Ok(Vec<String>),
    /// `ERR <code> <message>` - rejection, session stays open.
    Err {
        /// Numeric error code.
        code: u16,
        /// Remainder of the line.
        message: String,
    },
}

impl ServerReply {
    /// Parse a reply line (trailing newline already stripped).
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Malformed`] if the leading token is unknown or
    /// required arguments are missing.
    pub fn parse(line: &str) -> Result<Self, WireError> {
        let mut tokens = line.split_whitespace();
        let Some(head) = tokens.next() else {
            return Err(WireError::Malformed("empty reply line".to_string()));
        };
        match head {
            "HELLO" => Ok(Self::Hello(
                line.trim_start().trim_start_matches("HELLO").trim().to_string(),
            )),
            "STREAMID" => {
                let id = tokens
                    .next()
                    .ok_or_else(|| WireError::Malformed(format!("STREAMID without id: {line}")))?;
                Ok(Self::StreamId(id.to_string()))
            }
            "OK" => Ok(Self::Ok(tokens.map(str::to_string).collect())),
            "ERR" => {
                let code = tokens
                    .next()
                    .and_then(|c| c.parse().ok())
                    .ok_or_else(|| WireError::Malformed(format!("ERR without code: {line}")))?;
                Ok(Self::Err {
                    code,
                    message: tokens.collect::<Vec<_>>().join(" "),
                })
            }
            other => Err(WireError::Malformed(format!("unknown reply token {other}"))),
        }
    }

    /// Render the reply as a wire line (no trailing newline).
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Hello(banner) => format!("HELLO {banner}"),
            Self::StreamId(id) => format!("STREAMID {id}"),
            Self::Ok(args) => {
                if args.is_empty() {
                    "OK".to_string()
                } else {
                    format!("OK {}", args.join(" "))
                }
            }
            Self::Err { code, message } => format!("ERR {code} {message}"),
        }
    }
}

/// A command line received by the collector: leading token plus arguments.
///
/// Tokens are split on whitespace after commas have been normalized to
/// spaces, so `INIT STREAM,host:path` and `INIT STREAM host:path` parse the
/// same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCommand {
    /// Command token, e.g. `INIT` or `CLOSE`.
    pub name: String,
    /// Remaining tokens.
    pub args: Vec<String>,
}

impl ClientCommand {
    /// Parse a command line. Returns `None` for blank lines, which the
    /// collector skips without consuming a command index.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let normalized = line.trim().replace(',', " ");
        let mut tokens = normalized.split_whitespace();
        let name = tokens.next()?.to_string();
        Some(Self {
            name,
            args: tokens.map(str::to_string).collect(),
        })
    }

    /// Render an `INIT STREAM` command for the given stream identity.
    #[must_use]
    pub fn render_init(hostname: &str, remote_path: &str) -> String {
        format!("INIT STREAM {hostname}:{remote_path}")
    }
}

/// Split a `hostname:path` argument into its parts.
///
/// Only the first `:` separates; the path may contain further colons.
#[must_use]
pub fn parse_stream_target(arg: &str) -> Option<(&str, &str)> {
    let (host, path) = arg.split_once(':')?;
    if host.is_empty() || path.is_empty() {
        return None;
    }
    Some((host, path))
}
