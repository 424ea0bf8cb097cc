use std::{
    collections::HashMap,
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, ToSocketAddrs},
    sync::{Arc, Mutex, PoisonError},
};

use log::{info, warn};

use crate::{
    crypt::encrypt_challenge,
    fields::{Field, FieldRegistry, Permission},
};

use super::{
    ProtocolTransport, Reply, Request, code, thread::ConnectionPool, transport::TransportError,
};

/// Canned directory contents served by [`PseudoServer`].
///
/// Subjects map to a number of matching entries; unknown subjects match
/// `default_matches` entries. Every record value is synthesized from the
/// record index and the field name.
#[derive(Debug, Clone)]
pub struct Directory {
    banner: String,
    fields: FieldRegistry,
    subjects: HashMap<String, usize>,
    default_matches: usize,
    cap: usize,
    password: String,
    challenge: String,
}

impl Directory {
    /// Sixteen fields `field1..field16`, one per (write, read) pair of
    /// classes, and the subjects `missing` (0), `unique` (1), `ambiguous`
    /// (2) and `excessive` (30). Any other subject matches two entries.
    pub fn fixture() -> Self {
        let classes = [
            Permission::Any,
            Permission::User,
            Permission::Nobody,
            Permission::Trusted,
        ];
        let mut fields = Vec::new();
        for write in classes {
            for read in classes {
                fields.push(Field::new(format!("field{}", fields.len() + 1), read, write));
            }
        }

        Self {
            banner: "DND server here.".to_string(),
            fields: FieldRegistry::new(fields),
            subjects: HashMap::from([
                ("missing".to_string(), 0),
                ("unique".to_string(), 1),
                ("ambiguous".to_string(), 2),
                ("excessive".to_string(), 30),
            ]),
            default_matches: 2,
            cap: 25,
            password: "testpass".to_string(),
            challenge: "240147326165005023201134".to_string(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>, matches: usize) -> Self {
        self.subjects.insert(subject.into(), matches);
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_challenge(mut self, challenge: impl Into<String>) -> Self {
        self.challenge = challenge.into();
        self
    }

    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = cap;
        self
    }

    pub fn fields(&self) -> &FieldRegistry {
        &self.fields
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    fn matches(&self, subject: &str) -> usize {
        self.subjects
            .get(subject)
            .copied()
            .unwrap_or(self.default_matches)
    }

    /// Checks that every requested field exists and is readable at `visibility`.
    fn check_fields(&self, fields: &[String], visibility: Permission) -> Result<(), Reply> {
        for name in fields {
            let Some(field) = self.fields.field_named(name) else {
                return Err(Reply::new(
                    code::UNKNOWN_FIELD,
                    format!("No such field: {name}"),
                ));
            };

            if !field.is_readable_by(visibility) {
                return Err(Reply::new(
                    code::ACCESS_DENIED,
                    format!("Field access denied: {name}"),
                ));
            }
        }
        Ok(())
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::fixture()
    }
}

/// One command received by the server and the codes it answered with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub request: Request,
    pub replies: Vec<u16>,
}

pub type Transcript = Arc<Mutex<Vec<Exchange>>>;

/// Validation opened by `VALIDATE` and not yet answered.
#[derive(Debug)]
struct PendingValidation {
    fields: Vec<String>,
}

/// Per-connection server state.
#[derive(Debug)]
struct ConnectionState {
    validation: Option<PendingValidation>,
    visibility: Permission,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            validation: None,
            visibility: Permission::Any,
        }
    }
}

impl ConnectionState {
    fn handle(&mut self, directory: &Directory, request: Request) -> Vec<Reply> {
        match request {
            Request::Quit | Request::Noop => vec![Reply::new(code::OK, "Ok")],
            Request::Fields => self.out_of_sequence().unwrap_or_else(|| field_batch(directory)),
            Request::Unprivilege => self.out_of_sequence().unwrap_or_else(|| {
                self.visibility = Permission::Any;
                vec![Reply::new(code::OK, "Permissions removed")]
            }),
            Request::Lookup { subject, fields } => self
                .out_of_sequence()
                .unwrap_or_else(|| self.lookup(directory, &subject, &fields)),
            Request::Validate { subject, fields } => self
                .out_of_sequence()
                .unwrap_or_else(|| self.validate(directory, &subject, fields)),
            Request::Password(password) => self.answer(password == directory.password),
            Request::EncryptedPassword(token) => {
                let accepted = encrypt_challenge(&directory.challenge, &directory.password)
                    .is_ok_and(|expected| expected == token);
                self.answer(accepted)
            }
            Request::Unknown { .. } => vec![Reply::new(
                code::UNKNOWN_COMMAND,
                "Syntax error, command unknown.",
            )],
        }
    }

    /// Any command but a credential drops a pending validation with a `502`.
    fn out_of_sequence(&mut self) -> Option<Vec<Reply>> {
        self.validation
            .take()
            .map(|_| vec![Reply::new(code::BAD_SEQUENCE, "Bad sequence of commands")])
    }

    fn lookup(&self, directory: &Directory, subject: &str, fields: &[String]) -> Vec<Reply> {
        let matches = directory.matches(subject);
        if matches == 0 {
            return vec![Reply::new(code::NO_MATCH, "No match for that name.")];
        }
        if let Err(reply) = directory.check_fields(fields, self.visibility) {
            return vec![reply];
        }

        let returned = matches.min(directory.cap);
        let mut replies = vec![Reply::new(
            code::RECORD_BATCH,
            format!("{returned} {}", fields.len()),
        )];
        for i in 1..=returned {
            for field in fields {
                replies.push(Reply::new(
                    code::RECORD_DATA,
                    format!("Data for user {i} {field}"),
                ));
            }
        }

        if returned < matches {
            replies.push(Reply::new(
                code::OK_MORE,
                "Additional matching records not returned.",
            ));
        } else {
            replies.push(Reply::new(code::OK, "Ok."));
        }
        replies
    }

    fn validate(
        &mut self,
        directory: &Directory,
        subject: &str,
        fields: Vec<String>,
    ) -> Vec<Reply> {
        match directory.matches(subject) {
            0 => return vec![Reply::new(code::NO_MATCH, "Invalid name.")],
            1 => {}
            _ => return vec![Reply::new(code::AMBIGUOUS, "Ambiguous name.")],
        }
        if let Err(reply) = directory.check_fields(&fields, Permission::User) {
            return vec![reply];
        }

        self.validation = Some(PendingValidation { fields });
        vec![Reply::new(code::CHALLENGE, directory.challenge.clone())]
    }

    fn answer(&mut self, accepted: bool) -> Vec<Reply> {
        let Some(pending) = self.validation.take() else {
            return vec![Reply::new(code::BAD_SEQUENCE, "Bad sequence of commands")];
        };

        if !accepted {
            return vec![Reply::new(code::BAD_CREDENTIAL, "Incorrect password.")];
        }

        self.visibility = Permission::User;
        let mut replies = vec![Reply::new(
            code::RECORD_BATCH,
            format!("1 {}", pending.fields.len()),
        )];
        for field in &pending.fields {
            replies.push(Reply::new(code::RECORD_DATA, format!("Data for {field}")));
        }
        replies.push(Reply::new(code::OK, "Validation ok."));
        replies
    }
}

fn field_batch(directory: &Directory) -> Vec<Reply> {
    let mut replies = vec![Reply::new(
        code::FIELD_BATCH,
        directory.fields.len().to_string(),
    )];
    for field in directory.fields.iter() {
        replies.push(Reply::new(code::FIELD_DATA, field.to_line()));
    }
    replies.push(Reply::new(code::OK, "Done"));
    replies
}

/// Deterministic stand-in for a DND server.
pub struct PseudoServer {
    listener: TcpListener,
    directory: Arc<Directory>,
    transcript: Transcript,
}

impl PseudoServer {
    pub fn bind(address: impl ToSocketAddrs, directory: Directory) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(address)?,
            directory: Arc::new(directory),
            transcript: Transcript::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared log of every command received, in arrival order.
    pub fn transcript(&self) -> Transcript {
        Arc::clone(&self.transcript)
    }

    /// Accepts a single client and serves it until it quits or disconnects.
    pub fn serve_one(&self) -> Result<(), TransportError> {
        let (stream, peer) = self.listener.accept()?;
        info!("client connected: {peer}");
        let res = handle_connection(stream, &self.directory, &self.transcript);
        info!("client disconnected: {peer}");
        res
    }

    /// Serves clients until the listener fails, `workers` at a time.
    pub fn listen(self, workers: usize) -> Result<(), TransportError> {
        info!("listening at {}", self.listener.local_addr()?);
        let pool = ConnectionPool::new(workers);

        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let directory = Arc::clone(&self.directory);
                    let transcript = Arc::clone(&self.transcript);
                    pool.execute(move || {
                        if let Err(e) = handle_connection(stream, &directory, &transcript) {
                            warn!("client session ended with error: {e}");
                        }
                    });
                }
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }
        Ok(())
    }
}

fn handle_connection<T: Read + Write>(
    stream: T,
    directory: &Directory,
    transcript: &Transcript,
) -> Result<(), TransportError> {
    let mut transport = ProtocolTransport::new(stream);
    let mut state = ConnectionState::default();

    transport.write_reply(&Reply::new(code::GREETING, directory.banner.clone()))?;

    loop {
        let request = match transport.read_request() {
            Ok(request) => request,
            Err(TransportError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };

        let quit = request == Request::Quit;
        let replies = state.handle(directory, request.clone());
        transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Exchange {
                request,
                replies: replies.iter().map(|r| r.code).collect(),
            });

        transport.write_replies(&replies)?;

        if quit {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(replies: &[Reply]) -> Vec<u16> {
        replies.iter().map(|r| r.code).collect()
    }

    fn lookup(subject: &str, fields: &[&str]) -> Request {
        Request::Lookup {
            subject: subject.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn validate(subject: &str, fields: &[&str]) -> Request {
        Request::Validate {
            subject: subject.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn fixture_fields() {
        let directory = Directory::fixture();
        let field7 = directory.fields().field_named("field7").unwrap();

        assert_eq!(directory.fields().len(), 16);
        assert_eq!(field7.read, Permission::Nobody);
        assert_eq!(field7.write, Permission::User);
    }

    #[test]
    fn fields_batch() {
        let mut state = ConnectionState::default();
        let replies = state.handle(&Directory::fixture(), Request::Fields);

        assert_eq!(replies.len(), 18);
        assert_eq!(replies[0], Reply::new(code::FIELD_BATCH, "16"));
        assert_eq!(replies[17].code, code::OK);
    }

    #[test]
    fn lookup_is_capped() {
        let mut state = ConnectionState::default();
        let replies = state.handle(
            &Directory::fixture(),
            lookup("excessive", &["field1", "field9"]),
        );

        assert_eq!(replies[0], Reply::new(code::RECORD_BATCH, "25 2"));
        assert_eq!(replies.len(), 1 + 50 + 1);
        assert_eq!(replies[1].text, "Data for user 1 field1");
        assert_eq!(replies.last().unwrap().code, code::OK_MORE);
    }

    #[test]
    fn lookup_failures() {
        let directory = Directory::fixture();
        let mut state = ConnectionState::default();

        let missing = state.handle(&directory, lookup("missing", &[]));
        let unknown = state.handle(&directory, lookup("ambiguous", &["field1", "nosuchfield"]));
        let denied = state.handle(&directory, lookup("ambiguous", &["field1", "field7"]));

        assert_eq!(codes(&missing), vec![code::NO_MATCH]);
        assert_eq!(codes(&unknown), vec![code::UNKNOWN_FIELD]);
        assert_eq!(codes(&denied), vec![code::ACCESS_DENIED]);
    }

    #[test]
    fn validation_must_be_answered_next() {
        let directory = Directory::fixture();
        let mut state = ConnectionState::default();

        let challenge = state.handle(&directory, validate("unique", &["field2"]));
        assert_eq!(challenge, vec![Reply::new(code::CHALLENGE, "240147326165005023201134")]);

        let fault = state.handle(&directory, Request::Fields);
        assert_eq!(codes(&fault), vec![code::BAD_SEQUENCE]);

        let late = state.handle(&directory, Request::Password("testpass".to_string()));
        assert_eq!(codes(&late), vec![code::BAD_SEQUENCE]);
    }

    #[test]
    fn encrypted_answer_grants_user_visibility() {
        let directory = Directory::fixture();
        let mut state = ConnectionState::default();

        state.handle(&directory, validate("unique", &["field1", "field2"]));
        let token = encrypt_challenge("240147326165005023201134", "testpass").unwrap();
        let replies = state.handle(&directory, Request::EncryptedPassword(token));

        assert_eq!(
            codes(&replies),
            vec![code::RECORD_BATCH, code::RECORD_DATA, code::RECORD_DATA, code::OK]
        );
        assert_eq!(state.visibility, Permission::User);

        let batch = state.handle(&directory, lookup("ambiguous", &["field2"]));
        assert_eq!(batch[0].code, code::RECORD_BATCH);

        state.handle(&directory, Request::Unprivilege);
        assert_eq!(state.visibility, Permission::Any);
    }

    #[test]
    fn wrong_password_closes_validation() {
        let directory = Directory::fixture();
        let mut state = ConnectionState::default();

        state.handle(&directory, validate("unique", &[]));
        let replies = state.handle(&directory, Request::Password("wrongpw".to_string()));

        assert_eq!(codes(&replies), vec![code::BAD_CREDENTIAL]);
        assert!(state.validation.is_none());
    }

    #[test]
    fn ambiguous_validation() {
        let directory = Directory::fixture();
        let mut state = ConnectionState::default();

        let ambiguous = state.handle(&directory, validate("excessive", &[]));
        let missing = state.handle(&directory, validate("missing", &[]));

        assert_eq!(codes(&ambiguous), vec![code::AMBIGUOUS]);
        assert_eq!(codes(&missing), vec![code::NO_MATCH]);
        assert!(state.validation.is_none());
    }

    #[test]
    fn unknown_verb() {
        let mut state = ConnectionState::default();
        let replies = state.handle(&Directory::fixture(), Request::parse("CHANGE field1 x"));

        assert_eq!(codes(&replies), vec![code::UNKNOWN_COMMAND]);
    }
}
