use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};

use log::debug;
use thiserror::Error;

/// Longest line accepted from a peer, terminator included.
const MAX_LINE: usize = 64 * 1024;

use super::{Reply, Request};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed by remote host")]
    ConnectionClosed,
    #[error("connection reset by remote host")]
    ConnectionReset,
    #[error("timed out waiting on the connection")]
    Timeout,
    #[error("protocol framing error: {0}")]
    Framing(String),
    #[error("Transport IO Error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            ErrorKind::UnexpectedEof | ErrorKind::BrokenPipe | ErrorKind::NotConnected => {
                TransportError::ConnectionClosed
            }
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                TransportError::ConnectionReset
            }
            ErrorKind::WouldBlock | ErrorKind::TimedOut => TransportError::Timeout,
            ErrorKind::InvalidData => TransportError::Framing(value.to_string()),
            _ => TransportError::Io(value),
        }
    }
}

/// Line framer shared by the client session and the test server.
///
/// Every message is a single `\n` terminated ASCII line. Reads are buffered
/// and bounded by [`MAX_LINE`]; each message goes out in one write.
pub struct ProtocolTransport<T: Read + Write> {
    stream: BufReader<T>,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    pub fn write_request(&mut self, request: &Request) -> Result<(), TransportError> {
        debug!(">> {request}");
        self.write_line(&request.to_string())
    }

    pub fn write_reply(&mut self, reply: &Reply) -> Result<(), TransportError> {
        debug!("<< {reply}");
        self.write_line(&reply.to_string())
    }

    /// Writes a whole reply sequence (a batch and its terminator) at once.
    pub fn write_replies(&mut self, replies: &[Reply]) -> Result<(), TransportError> {
        let mut buf = String::new();
        for reply in replies {
            debug!("<< {reply}");
            buf.push_str(&reply.to_string());
            buf.push('\n');
        }
        self.write_raw(buf.as_bytes())
    }

    pub fn read_reply(&mut self) -> Result<Reply, TransportError> {
        let line = self.read_line()?;
        let reply = Reply::parse(&line)?;
        debug!("<< {reply}");
        Ok(reply)
    }

    pub fn read_request(&mut self) -> Result<Request, TransportError> {
        let line = self.read_line()?;
        let request = Request::parse(&line);
        debug!(">> {request}");
        Ok(request)
    }

    pub fn get_ref(&self) -> &T {
        self.stream.get_ref()
    }

    fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.write_raw(format!("{line}\n").as_bytes())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.get_mut();
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, TransportError> {
        let mut buf = Vec::new();
        let read = self
            .stream
            .by_ref()
            .take(MAX_LINE as u64)
            .read_until(b'\n', &mut buf)?;
        if read == 0 {
            return Err(TransportError::ConnectionClosed);
        }
        if read == MAX_LINE && !buf.ends_with(b"\n") {
            return Err(TransportError::Framing(format!(
                "line exceeds {MAX_LINE} bytes"
            )));
        }

        String::from_utf8(buf)
            .map_err(|e| TransportError::Framing(format!("line is not valid UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::protocol::code;

    /// Stream that replays canned input and records what was written.
    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
        writes: usize,
    }

    impl Duplex {
        fn new(input: &str) -> Self {
            Self {
                input: Cursor::new(input.as_bytes().to_vec()),
                output: Vec::new(),
                writes: 0,
            }
        }
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes += 1;
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_request_line() {
        let mut transport = ProtocolTransport::new(Duplex::new(""));

        transport
            .write_request(&Request::Lookup {
                subject: "unique".to_string(),
                fields: vec!["field1".to_string()],
            })
            .unwrap();
        transport.write_request(&Request::Noop).unwrap();

        assert_eq!(
            String::from_utf8(transport.get_ref().output.clone()).unwrap(),
            "LOOKUP unique,field1\nNOOP\n"
        );
    }

    #[test]
    fn each_message_is_one_write() {
        let mut transport = ProtocolTransport::new(Duplex::new(""));

        transport.write_request(&Request::Noop).unwrap();
        assert_eq!(transport.get_ref().writes, 1);

        transport
            .write_replies(&[
                Reply::new(code::RECORD_BATCH, "1 1"),
                Reply::new(code::RECORD_DATA, "Data for field1"),
                Reply::new(code::OK, "Ok."),
            ])
            .unwrap();
        assert_eq!(transport.get_ref().writes, 2);
        assert_eq!(
            String::from_utf8(transport.get_ref().output.clone()).unwrap(),
            "NOOP\n101 1 1\n110 Data for field1\n200 Ok.\n"
        );
    }

    #[test]
    fn overlong_line_is_framing_error() {
        let input = format!("200 {}\n", "a".repeat(MAX_LINE));
        let mut transport = ProtocolTransport::new(Duplex::new(&input));

        let err = transport.read_reply().unwrap_err();
        assert!(matches!(err, TransportError::Framing(_)));
    }

    #[test]
    fn line_at_limit_is_accepted() {
        let input = format!("200 {}\n", "a".repeat(MAX_LINE - 5));
        let mut transport = ProtocolTransport::new(Duplex::new(&input));

        let reply = transport.read_reply().unwrap();
        assert_eq!(reply.text.len(), MAX_LINE - 5);
    }

    #[test]
    fn read_replies_in_order() {
        let mut transport = ProtocolTransport::new(Duplex::new("220 DND server here.\r\n200\n"));

        let greeting = transport.read_reply().unwrap();
        assert_eq!(greeting, Reply::new(code::GREETING, "DND server here."));

        let ok = transport.read_reply().unwrap();
        assert_eq!(ok, Reply::new(code::OK, ""));
    }

    #[test]
    fn read_past_end_is_connection_closed() {
        let mut transport = ProtocolTransport::new(Duplex::new("200 Ok\n"));

        transport.read_reply().unwrap();
        let err = transport.read_reply().unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }

    #[test]
    fn malformed_line_is_framing_error() {
        let mut transport = ProtocolTransport::new(Duplex::new("hello there\n"));

        let err = transport.read_reply().unwrap_err();
        assert!(matches!(err, TransportError::Framing(_)));
    }

    #[test]
    fn read_request_line() {
        let mut transport = ProtocolTransport::new(Duplex::new("quit\n"));

        assert_eq!(transport.read_request().unwrap(), Request::Quit);
    }

    #[test]
    fn io_error_kinds_map_to_connection_errors() {
        let reset: TransportError = io::Error::from(ErrorKind::ConnectionReset).into();
        let pipe: TransportError = io::Error::from(ErrorKind::BrokenPipe).into();
        let timeout: TransportError = io::Error::from(ErrorKind::WouldBlock).into();

        assert!(matches!(reset, TransportError::ConnectionReset));
        assert!(matches!(pipe, TransportError::ConnectionClosed));
        assert!(matches!(timeout, TransportError::Timeout));
    }
}
