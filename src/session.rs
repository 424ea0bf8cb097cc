//! Client session engine.
//!
//! A [`Session`] owns one DND connection and sequences every exchange on it.
//! Because the protocol carries no request identifiers, a session serializes
//! its callers behind a mutex: one command is written and its full reply
//! (including any batch of data lines) is consumed before the next command
//! may go out.
//!
//! # States
//!
//! - `Connected`: the greeting was read and no validation is pending.
//! - `AwaitingCredential`: a `VALIDATE` was answered with a `300` challenge.
//!   Only the [`Responder`] returned by [`Session::begin_validate`] may talk
//!   to the server now; every other operation fails with
//!   [`DndError::Sequence`] without writing anything.
//! - `Closed`: the session was closed, or a connection-level error (EOF,
//!   reset, timeout, malformed line) ended it. Nothing can be sent any more.
//!
//! Server failures (`5xx`) surface as typed errors and leave the session
//! usable.
//!
//! # Example
//! ```no_run
//! use dnd::{CredentialMode, Session, SessionConfig};
//!
//! let session = Session::connect(&SessionConfig::new("dnd.example.edu", 902)).unwrap();
//! let batch = session.lookup("jane doe", &["name", "email"]).unwrap();
//! for record in &batch {
//!     println!("{:?}", record.get("email"));
//! }
//!
//! let responder = session.begin_validate("jane doe", &["name"]).unwrap();
//! responder.respond("secret", CredentialMode::Encrypted).unwrap();
//! session.close().unwrap();
//! ```
use std::{
    io::{self, ErrorKind, Read, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, TryLockError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use log::{debug, info, warn};

use crate::{
    crypt::encrypt_challenge,
    error::DndError,
    fields::{Field, FieldRegistry, Permission},
    protocol::{ProtocolTransport, Reply, ReplyClass, Request, TransportError, code},
    record::{Record, RecordBatch},
};

pub const DEFAULT_PORT: u16 = 902;
const DEFAULT_SERVER: &str = "dnd.dartmouth.edu";
/// Largest record batch a session will build.
const MAX_BATCH_RECORDS: usize = 4096;

/// Where to connect and how long to wait on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub server: String,
    pub port: u16,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl SessionConfig {
    pub fn new(server: impl Into<String>, port: u16) -> Self {
        Self {
            server: server.into(),
            port,
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Some(Duration::from_secs(10)),
            read_timeout: Some(Duration::from_secs(30)),
            write_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// How a [`Responder`] answers a challenge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CredentialMode {
    /// `PASS <password>`
    #[default]
    Plaintext,
    /// `PASE <token>`, see [`encrypt_challenge`].
    Encrypted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    AwaitingCredential,
    Closed,
}

/// Challenge state between a `300` reply and its single answer.
#[derive(Debug)]
struct ValidationContext {
    ticket: u64,
    subject: String,
    fields: Vec<String>,
    challenge: String,
}

struct Connection<T: Read + Write> {
    transport: Option<ProtocolTransport<T>>,
    registry: Option<Arc<FieldRegistry>>,
    validation: Option<ValidationContext>,
    privileged: bool,
    tickets: u64,
}

type Interrupt = Box<dyn Fn() + Send + Sync>;

/// A live DND session. See the [module docs](self).
pub struct Session<T: Read + Write = TcpStream> {
    conn: Mutex<Connection<T>>,
    closed: AtomicBool,
    /// Set while an exchange is on the wire.
    in_flight: AtomicBool,
    interrupt: Option<Interrupt>,
    banner: String,
}

impl Session<TcpStream> {
    /// Resolves and connects to the configured server and reads its greeting.
    pub fn connect(config: &SessionConfig) -> Result<Self, DndError> {
        let stream = open_stream(config)?;
        let handle = stream.try_clone().map_err(TransportError::from)?;

        let mut session = Session::new(stream)?;
        session.interrupt = Some(Box::new(move || {
            if let Err(e) = handle.shutdown(Shutdown::Both) {
                debug!("shutdown of interrupted connection failed: {e}");
            }
        }));
        Ok(session)
    }
}

fn open_stream(config: &SessionConfig) -> Result<TcpStream, TransportError> {
    let mut last_error = None;

    for addr in (config.server.as_str(), config.port).to_socket_addrs()? {
        let attempt = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };

        match attempt {
            Ok(stream) => {
                stream.set_read_timeout(config.read_timeout)?;
                stream.set_write_timeout(config.write_timeout)?;
                info!("connected to {addr}");
                return Ok(stream);
            }
            Err(e) => {
                debug!("connect to {addr} failed: {e}");
                last_error = Some(e);
            }
        }
    }

    let err = last_error.unwrap_or_else(|| {
        io::Error::new(
            ErrorKind::NotFound,
            format!("no addresses found for {}", config.server),
        )
    });
    Err(err.into())
}

impl<T: Read + Write> Session<T> {
    /// Starts a session over an already connected stream.
    pub fn new(stream: T) -> Result<Self, DndError> {
        let mut transport = ProtocolTransport::new(stream);

        let greeting = transport.read_reply()?;
        if greeting.code != code::GREETING {
            return Err(DndError::unexpected(&greeting));
        }
        info!("server greeting: {}", greeting.text);

        Ok(Self {
            conn: Mutex::new(Connection {
                transport: Some(transport),
                registry: None,
                validation: None,
                privileged: false,
                tickets: 0,
            }),
            closed: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            interrupt: None,
            banner: greeting.text,
        })
    }

    /// Text of the server's `220` greeting.
    pub fn banner(&self) -> &str {
        &self.banner
    }

    pub fn state(&self) -> SessionState {
        let conn = self.lock();
        if self.closed.load(Ordering::SeqCst) || conn.transport.is_none() {
            SessionState::Closed
        } else if conn.validation.is_some() {
            SessionState::AwaitingCredential
        } else {
            SessionState::Connected
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Field descriptors, fetched with `FIELDS` on first use and cached for
    /// the lifetime of the session.
    pub fn fetch_fields(&self) -> Result<Arc<FieldRegistry>, DndError> {
        self.with_connection(|conn| conn.fetch_fields())
    }

    /// The cached registry, if [`fetch_fields`](Self::fetch_fields) already ran.
    pub fn fields(&self) -> Option<Arc<FieldRegistry>> {
        self.lock().registry.clone()
    }

    /// Looks up `subject`, returning the requested fields of every match.
    ///
    /// Values in each record follow the order of `fields`. The batch is
    /// marked truncated when the server withheld further matches.
    pub fn lookup(&self, subject: &str, fields: &[&str]) -> Result<RecordBatch, DndError> {
        self.with_connection(|conn| conn.lookup(subject, fields))
    }

    /// Number of entries the server returns for `subject`.
    pub fn lookup_count(&self, subject: &str) -> Result<usize, DndError> {
        self.with_connection(|conn| conn.lookup_count(subject))
    }

    /// Like [`lookup`](Self::lookup), but yields an empty batch unless exactly
    /// one entry matches. A subject with no match is not an error here.
    pub fn lookup_unique(&self, subject: &str, fields: &[&str]) -> Result<RecordBatch, DndError> {
        match self.lookup(subject, fields) {
            Ok(batch) if batch.len() == 1 && !batch.truncated => Ok(batch),
            Ok(_) | Err(DndError::NotFound(_)) => Ok(RecordBatch::default()),
            Err(e) => Err(e),
        }
    }

    /// Asks the server to validate `subject`.
    ///
    /// On success the session awaits a credential until the returned
    /// [`Responder`] answers or is dropped; a dropped responder declines the
    /// challenge.
    pub fn begin_validate(
        &self,
        subject: &str,
        fields: &[&str],
    ) -> Result<Responder<'_, T>, DndError> {
        let (ticket, challenge) =
            self.with_connection(|conn| conn.begin_validate(subject, fields))?;

        Ok(Responder {
            session: self,
            ticket,
            challenge,
        })
    }

    /// Validates `subject` with a plaintext password in one call.
    pub fn validate(
        &self,
        subject: &str,
        password: &str,
        fields: &[&str],
    ) -> Result<RecordBatch, DndError> {
        self.begin_validate(subject, fields)?
            .respond(password, CredentialMode::Plaintext)
    }

    /// `NOOP` liveness probe.
    pub fn keep_alive(&self) -> Result<(), DndError> {
        self.with_connection(|conn| {
            let reply = conn.command(Request::Noop)?;
            expect_ok(reply)
        })
    }

    /// Drops privileges gained through validation.
    pub fn unprivilege(&self) -> Result<(), DndError> {
        self.with_connection(|conn| {
            let reply = conn.command(Request::Unprivilege)?;
            expect_ok(reply)?;
            conn.privileged = false;
            Ok(())
        })
    }

    /// Sends `QUIT` and releases the connection.
    ///
    /// The connection is released even when the server does not acknowledge
    /// the `QUIT`. Closing a closed session does nothing. When another thread
    /// has a request on the wire, the connection is shut down under it and
    /// that call fails with `ConnectionClosed`; otherwise `close` waits for
    /// the lock and quits normally.
    pub fn close(&self) -> Result<(), DndError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut conn = match self.conn.try_lock() {
            Ok(conn) => conn,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                if self.in_flight.load(Ordering::SeqCst) {
                    if let Some(interrupt) = &self.interrupt {
                        debug!("interrupting in-flight request");
                        interrupt();
                    }
                }
                self.lock()
            }
        };
        conn.quit()
    }

    fn lock(&self) -> MutexGuard<'_, Connection<T>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one exchange under the session lock. A terminal error releases
    /// the connection before it is returned.
    fn with_connection<R>(
        &self,
        op: impl FnOnce(&mut Connection<T>) -> Result<R, DndError>,
    ) -> Result<R, DndError> {
        let mut conn = self.lock();
        if self.closed.load(Ordering::SeqCst) {
            conn.release();
            return Err(TransportError::ConnectionClosed.into());
        }

        self.in_flight.store(true, Ordering::SeqCst);
        let res = op(&mut conn);
        self.in_flight.store(false, Ordering::SeqCst);
        if let Err(e) = &res {
            if e.is_terminal() {
                warn!("session terminated: {e}");
                conn.release();
            }
        }
        res
    }
}

impl<T: Read + Write> Drop for Session<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("error closing dropped session: {e}");
        }
    }
}

/// One-shot answer to a validation challenge.
pub struct Responder<'s, T: Read + Write = TcpStream> {
    session: &'s Session<T>,
    ticket: u64,
    challenge: String,
}

impl<T: Read + Write> Responder<'_, T> {
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// Answers the challenge and returns the validated record.
    ///
    /// The pending validation ends with this call whatever its outcome; a
    /// second call fails with [`DndError::Sequence`] and sends nothing.
    pub fn respond(&self, password: &str, mode: CredentialMode) -> Result<RecordBatch, DndError> {
        self.session
            .with_connection(|conn| conn.answer(self.ticket, password, mode))
    }
}

impl<T: Read + Write> Drop for Responder<'_, T> {
    fn drop(&mut self) {
        let ticket = self.ticket;
        if let Err(e) = self.session.with_connection(|conn| conn.abandon(ticket)) {
            debug!("could not decline unanswered challenge: {e}");
        }
    }
}

impl<T: Read + Write> Connection<T> {
    fn transport(&mut self) -> Result<&mut ProtocolTransport<T>, DndError> {
        self.transport
            .as_mut()
            .ok_or(DndError::Transport(TransportError::ConnectionClosed))
    }

    fn release(&mut self) {
        self.transport = None;
        self.validation = None;
    }

    /// Refuses to send anything but a credential while a challenge is open.
    fn ensure_idle(&self, request: &Request) -> Result<(), DndError> {
        match &self.validation {
            Some(ctx) => Err(DndError::Sequence(format!(
                "validation of '{}' is awaiting a credential, {} not sent",
                ctx.subject,
                request.verb()
            ))),
            None => Ok(()),
        }
    }

    fn send(&mut self, request: &Request) -> Result<(), DndError> {
        self.transport()?.write_request(request)?;
        Ok(())
    }

    fn read(&mut self) -> Result<Reply, DndError> {
        Ok(self.transport()?.read_reply()?)
    }

    fn command(&mut self, request: Request) -> Result<Reply, DndError> {
        self.ensure_idle(&request)?;
        self.send(&request)?;
        self.read()
    }

    fn fetch_fields(&mut self) -> Result<Arc<FieldRegistry>, DndError> {
        if let Some(registry) = &self.registry {
            return Ok(Arc::clone(registry));
        }

        let header = self.command(Request::Fields)?;
        if header.is_failure() {
            return Err(DndError::from_failure(header));
        }
        if header.code != code::FIELD_BATCH {
            return Err(DndError::unexpected(&header));
        }
        let count = header
            .text
            .trim()
            .parse::<usize>()
            .map_err(|_| DndError::framing(format!("bad field batch header '{header}'")))?;

        let mut fields = Vec::new();
        for _ in 0..count {
            let line = self.read()?;
            if line.code != code::FIELD_DATA {
                return Err(DndError::unexpected(&line));
            }
            fields.push(Field::parse(&line.text).map_err(|e| DndError::framing(e.to_string()))?);
        }
        expect_ok(self.read()?)?;

        let registry = Arc::new(FieldRegistry::new(fields));
        info!("fetched {} field descriptors", registry.len());
        self.registry = Some(Arc::clone(&registry));
        Ok(registry)
    }

    fn lookup(&mut self, subject: &str, fields: &[&str]) -> Result<RecordBatch, DndError> {
        self.send_lookup(subject, fields)?;
        self.read_batch(&owned(fields))
    }

    /// Reads only the batch header and terminator of a field-less lookup.
    fn lookup_count(&mut self, subject: &str) -> Result<usize, DndError> {
        self.send_lookup(subject, &[])?;

        let (count, width) = self.read_batch_header()?;
        if width != 0 {
            return Err(DndError::framing(format!(
                "server sent {width} fields per record, none were requested"
            )));
        }
        self.read_batch_tail()?;
        Ok(count)
    }

    fn send_lookup(&mut self, subject: &str, fields: &[&str]) -> Result<(), DndError> {
        let request = Request::Lookup {
            subject: subject.to_string(),
            fields: owned(fields),
        };
        self.ensure_idle(&request)?;
        check_subject(subject)?;
        check_field_names(fields)?;
        let visibility = (!self.privileged).then_some(Permission::Any);
        self.precheck(fields, visibility)?;

        self.send(&request)
    }

    fn begin_validate(
        &mut self,
        subject: &str,
        fields: &[&str],
    ) -> Result<(u64, String), DndError> {
        let request = Request::Validate {
            subject: subject.to_string(),
            fields: owned(fields),
        };
        self.ensure_idle(&request)?;
        check_subject(subject)?;
        check_field_names(fields)?;
        self.precheck(fields, Some(Permission::User))?;

        self.send(&request)?;
        let reply = self.read()?;
        match reply.class() {
            ReplyClass::Challenge if reply.code == code::CHALLENGE => {}
            ReplyClass::Failure => return Err(DndError::from_failure(reply)),
            _ => return Err(DndError::unexpected(&reply)),
        }

        self.tickets += 1;
        self.validation = Some(ValidationContext {
            ticket: self.tickets,
            subject: subject.to_string(),
            fields: owned(fields),
            challenge: reply.text.clone(),
        });
        debug!("validation of '{subject}' awaiting credential");
        Ok((self.tickets, reply.text))
    }

    fn answer(
        &mut self,
        ticket: u64,
        password: &str,
        mode: CredentialMode,
    ) -> Result<RecordBatch, DndError> {
        let ctx = match self.validation.take() {
            Some(ctx) if ctx.ticket == ticket => ctx,
            other => {
                self.validation = other;
                return Err(DndError::Sequence(
                    "no validation is pending for this responder".to_string(),
                ));
            }
        };

        let request = match credential(&ctx.challenge, password, mode) {
            Ok(request) => request,
            Err(e) => {
                self.decline()?;
                return Err(e);
            }
        };
        self.send(&request)?;

        let batch = self.read_batch(&ctx.fields)?;
        self.privileged = true;
        info!("validated '{}'", ctx.subject);
        Ok(batch)
    }

    /// Declines the challenge owned by `ticket` if it is still open.
    fn abandon(&mut self, ticket: u64) -> Result<(), DndError> {
        if !self.validation.as_ref().is_some_and(|ctx| ctx.ticket == ticket) {
            return Ok(());
        }

        self.validation = None;
        warn!("challenge dropped without an answer, declining");
        self.decline()
    }

    /// Answers an open challenge with an empty password so the server
    /// closes its side too.
    fn decline(&mut self) -> Result<(), DndError> {
        self.send(&Request::Password(String::new()))?;
        let reply = self.read()?;
        debug!("declined challenge: {reply}");
        Ok(())
    }

    fn quit(&mut self) -> Result<(), DndError> {
        let Some(mut transport) = self.transport.take() else {
            return Ok(());
        };
        self.validation = None;

        let res = transport
            .write_request(&Request::Quit)
            .and_then(|_| transport.read_reply());
        drop(transport);
        info!("session closed");

        expect_ok(res?)
    }

    /// Rejects requests the server would refuse, using the cached registry.
    /// `visibility` of `None` only checks that the fields exist.
    fn precheck(&self, fields: &[&str], visibility: Option<Permission>) -> Result<(), DndError> {
        let Some(registry) = &self.registry else {
            return Ok(());
        };

        for name in fields {
            let field = registry
                .field_named(name)
                .ok_or_else(|| DndError::UnknownField(format!("No such field: {name}")))?;

            if let Some(visibility) = visibility {
                if !field.is_readable_by(visibility) {
                    return Err(DndError::PermissionDenied(format!(
                        "Field access denied: {name}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Reads a `101 <records> <fields>` batch with its data lines and
    /// terminator, naming values after `names`.
    fn read_batch(&mut self, names: &[String]) -> Result<RecordBatch, DndError> {
        let (count, width) = self.read_batch_header()?;
        if width != names.len() {
            return Err(DndError::framing(format!(
                "server sent {width} fields per record, {} were requested",
                names.len()
            )));
        }
        if count > MAX_BATCH_RECORDS {
            return Err(DndError::framing(format!(
                "server announced {count} records, at most {MAX_BATCH_RECORDS} are accepted"
            )));
        }

        let mut records = Vec::new();
        for _ in 0..count {
            let mut values = Vec::with_capacity(width);
            for name in names {
                let line = self.read()?;
                if line.code != code::RECORD_DATA {
                    return Err(DndError::unexpected(&line));
                }
                values.push((name.clone(), line.text));
            }
            records.push(Record::new(values));
        }

        let truncated = self.read_batch_tail()?;
        Ok(RecordBatch::new(records, truncated))
    }

    fn read_batch_header(&mut self) -> Result<(usize, usize), DndError> {
        let header = self.read()?;
        if header.is_failure() {
            return Err(DndError::from_failure(header));
        }
        if header.code != code::RECORD_BATCH {
            return Err(DndError::unexpected(&header));
        }
        batch_dimensions(&header)
    }

    /// Reads the line closing a batch; true when the server withheld matches.
    fn read_batch_tail(&mut self) -> Result<bool, DndError> {
        let tail = self.read()?;
        match tail.code {
            code::OK => Ok(false),
            code::OK_MORE => Ok(true),
            _ if tail.is_failure() => Err(DndError::from_failure(tail)),
            _ => Err(DndError::unexpected(&tail)),
        }
    }
}

fn credential(challenge: &str, password: &str, mode: CredentialMode) -> Result<Request, DndError> {
    check_line("password", password)?;
    Ok(match mode {
        CredentialMode::Plaintext => Request::Password(password.to_string()),
        CredentialMode::Encrypted => {
            Request::EncryptedPassword(encrypt_challenge(challenge, password)?)
        }
    })
}

fn expect_ok(reply: Reply) -> Result<(), DndError> {
    match reply.class() {
        ReplyClass::Success if reply.code == code::OK => Ok(()),
        ReplyClass::Failure => Err(DndError::from_failure(reply)),
        _ => Err(DndError::unexpected(&reply)),
    }
}

fn batch_dimensions(header: &Reply) -> Result<(usize, usize), DndError> {
    let mut parts = header.text.split_whitespace().map(str::parse::<usize>);
    match (parts.next(), parts.next()) {
        (Some(Ok(count)), Some(Ok(width))) => Ok((count, width)),
        _ => Err(DndError::framing(format!("bad record batch header '{header}'"))),
    }
}

fn owned(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.to_string()).collect()
}

fn check_line(what: &str, value: &str) -> Result<(), DndError> {
    if value.contains(['\r', '\n']) {
        return Err(DndError::InvalidArgument(format!(
            "{what} must not contain line breaks"
        )));
    }
    Ok(())
}

fn check_subject(subject: &str) -> Result<(), DndError> {
    check_line("subject", subject)?;
    if subject.trim().is_empty() {
        return Err(DndError::InvalidArgument("subject is empty".to_string()));
    }
    if subject.contains(',') {
        return Err(DndError::InvalidArgument(format!(
            "subject '{subject}' must not contain ','"
        )));
    }
    Ok(())
}

fn check_field_names(fields: &[&str]) -> Result<(), DndError> {
    for name in fields {
        if name.is_empty() || name.contains(|c: char| c == ',' || c.is_whitespace()) {
            return Err(DndError::InvalidArgument(format!(
                "bad field name '{name}'"
            )));
        }
    }
    Ok(())
}
