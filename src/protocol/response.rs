use std::fmt;

use super::transport::TransportError;

/// Numeric reply codes spoken by DND servers.
pub mod code {
    pub const RECORD_BATCH: u16 = 101;
    pub const FIELD_BATCH: u16 = 102;
    pub const RECORD_DATA: u16 = 110;
    pub const FIELD_DATA: u16 = 120;

    pub const OK: u16 = 200;
    pub const OK_MORE: u16 = 201;
    pub const GREETING: u16 = 220;

    pub const CHALLENGE: u16 = 300;

    pub const UNKNOWN_COMMAND: u16 = 500;
    pub const UNKNOWN_FIELD: u16 = 501;
    pub const BAD_SEQUENCE: u16 = 502;
    pub const NO_MATCH: u16 = 520;
    pub const ACCESS_DENIED: u16 = 521;
    pub const AMBIGUOUS: u16 = 522;
    pub const BAD_CREDENTIAL: u16 = 530;
}

/// Class of a reply, decided by the leading digit of its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    /// `1xx`: batch header or data line; more lines follow.
    Continuation,
    /// `2xx`: the command finished successfully.
    Success,
    /// `3xx`: the server wants a credential.
    Challenge,
    /// `5xx`: the command failed; the connection is still usable.
    Failure,
    Other,
}

/// A single `<code> <text>` line received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    /// Parses one reply line. Trailing CR/LF is ignored; a line without a
    /// space carries an empty text.
    pub fn parse(line: &str) -> Result<Self, TransportError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (digits, text) = line.split_once(' ').unwrap_or((line, ""));

        if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TransportError::Framing(format!("malformed reply line '{line}'")));
        }

        let code = digits
            .parse::<u16>()
            .map_err(|_| TransportError::Framing(format!("malformed reply code '{digits}'")))?;

        Ok(Self::new(code, text))
    }

    pub fn class(&self) -> ReplyClass {
        match self.code / 100 {
            1 => ReplyClass::Continuation,
            2 => ReplyClass::Success,
            3 => ReplyClass::Challenge,
            5 => ReplyClass::Failure,
            _ => ReplyClass::Other,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.class() == ReplyClass::Failure
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03} {}", self.code, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reply_with_text() {
        let reply = Reply::parse("101 25 2\r\n").unwrap();
        assert_eq!(reply, Reply::new(code::RECORD_BATCH, "25 2"));
        assert_eq!(reply.class(), ReplyClass::Continuation);
    }

    #[test]
    fn parse_reply_without_text() {
        let reply = Reply::parse("200\n").unwrap();
        assert_eq!(reply, Reply::new(code::OK, ""));
        assert_eq!(reply.class(), ReplyClass::Success);
    }

    #[test]
    fn parse_reply_keeps_inner_spaces() {
        let reply = Reply::parse("110 Data for user 1 field1").unwrap();
        assert_eq!(reply.text, "Data for user 1 field1");
    }

    #[test]
    fn reply_classes() {
        assert_eq!(Reply::new(code::CHALLENGE, "x").class(), ReplyClass::Challenge);
        assert!(Reply::new(code::NO_MATCH, "No match").is_failure());
        assert_eq!(Reply::new(400, "").class(), ReplyClass::Other);
    }

    #[test]
    #[should_panic(expected = "Framing")]
    fn parse_reply_rejects_short_code() {
        Reply::parse("20 Ok").unwrap();
    }

    #[test]
    #[should_panic(expected = "Framing")]
    fn parse_reply_rejects_non_numeric_code() {
        Reply::parse("OK. fine").unwrap();
    }

    #[test]
    fn display_pads_code() {
        assert_eq!(Reply::new(5, "odd").to_string(), "005 odd");
    }
}
