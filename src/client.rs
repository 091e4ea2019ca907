//! Asynchronous HSE session for communicating with Yaskawa controllers.
//!
//! This module provides the [`Client`] struct, which owns the datagram
//! socket and demultiplexes every inbound datagram to the handler registered
//! for its request ID.
//!
//! # Overview
//!
//! The client handles:
//! - Connection lifecycle (connect with timeout, close)
//! - A receive loop with exactly one outstanding read while open
//! - Request ID allocation and the handler registry
//! - Response header decoding and dispatch
//! - Reporting of errors that belong to no pending request
//!
//! Higher level operations ([`Client::send_command`], [`Client::read_file`],
//! ...) are built on the public registry primitives and can be replicated for
//! custom commands.
//!
//! # Example
//!
//! ```no_run
//! use yaskawa_hse::{Client, DEFAULT_HSE_PORT};
//! use std::time::Duration;
//!
//! # async fn example() -> yaskawa_hse::Result<()> {
//! let client = Client::new();
//! client.set_error_handler(|error| eprintln!("unattributed error: {error}"));
//! client.connect("10.0.0.2", DEFAULT_HSE_PORT, Duration::from_millis(1500)).await?;
//!
//! client.write_int16_variable(6, -5, Duration::from_millis(100)).await?;
//! let value = client.read_int16_variable(6, Duration::from_millis(100)).await?;
//! assert_eq!(value, -5);
//!
//! client.close();
//! # Ok(())
//! # }
//! ```
//!
//! # Receive Loop
//!
//! While open, the client keeps one `recv` outstanding on its socket. For
//! every completed read:
//!
//! 1. If the client was closed, the loop stops without reading again.
//! 2. A transport error is reported to the error handler and the read is re-armed.
//! 3. A datagram that fails to decode is reported and dropped.
//! 4. A reply for a request ID without a handler is reported as
//!    [`HseError::UnknownRequest`] and dropped.
//! 5. Otherwise the handler is invoked with the header and payload.
//!
//! Handlers run synchronously inside the receive loop with no lock held, so
//! they may register or remove handlers (including themselves) and even close
//! the client.
//!
//! # Timeouts
//!
//! The registry never expires handlers. Each registration records its time
//! ([`Client::registered_at`]); the layer holding the [`HandlerToken`] decides
//! when to give up and calls [`Client::remove_handler`].

use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::command::{Command, DeleteFile, ReadVariable, Variable, WriteVariable};
use crate::error::{HseError, Result};
use crate::header::MAX_DATAGRAM_SIZE;
use crate::registry::{HandlerRegistry, HandlerToken, ReplyHandler};
use crate::response::ResponseHeader;
use crate::transport::{DatagramSocket, UdpTransport, DEFAULT_HSE_PORT, DEFAULT_TIMEOUT};

/// Observer for errors that can not be attributed to a pending request.
pub type ErrorHandler = Arc<dyn Fn(&HseError) + Send + Sync>;

/// Configuration for connecting a client.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientConfig {
    /// Controller host name or IP address.
    pub host: String,
    /// Controller UDP port.
    pub port: u16,
    /// Timeout for resolving and connecting.
    pub timeout: Duration,
}

impl ClientConfig {
    /// Creates a configuration with the default port and timeout.
    ///
    /// # Example
    ///
    /// ```
    /// use yaskawa_hse::{ClientConfig, DEFAULT_HSE_PORT};
    ///
    /// let config = ClientConfig::new("10.0.0.2");
    /// assert_eq!(config.port, DEFAULT_HSE_PORT);
    /// ```
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_HSE_PORT,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets a custom port (default is 10040).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets a custom connect timeout (default is 2 seconds).
    ///
    /// # Example
    ///
    /// ```
    /// use yaskawa_hse::ClientConfig;
    /// use std::time::Duration;
    ///
    /// let config = ClientConfig::new("10.0.0.2").with_timeout(Duration::from_secs(5));
    /// ```
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

enum State<S> {
    Idle,
    Open(Arc<S>),
    Closed,
}

struct Inner<S> {
    state: Mutex<State<S>>,
    registry: Mutex<HandlerRegistry>,
    next_request_id: AtomicU8,
    on_error: Mutex<Option<ErrorHandler>>,
    closed: CancellationToken,
}

/// HSE session over a datagram socket.
///
/// `Client` is a cheap handle; clones share the same session. The session is
/// closed by [`close`](Self::close) or when the last handle is dropped.
pub struct Client<S = UdpTransport> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Client<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Client<UdpTransport> {
    /// Creates a client that is not connected yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `host` and connects within `timeout`, then starts receiving.
    ///
    /// On failure the client stays unconnected and no receive loop is started.
    ///
    /// # Errors
    ///
    /// Returns `HseError::Timeout` or `HseError::Transport` if the connection
    /// could not be established, and `HseError::AlreadyOpen` or
    /// `HseError::Closed` if the client is not in its initial state.
    pub async fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        self.inner.check_idle()?;
        let transport = UdpTransport::connect(host, port, timeout).await?;
        debug!(remote = %transport.remote_addr(), "connected");
        self.open(transport)
    }

    /// Connects using a [`ClientConfig`].
    pub async fn connect_with(&self, config: &ClientConfig) -> Result<()> {
        self.connect(&config.host, config.port, config.timeout).await
    }
}

impl<S: DatagramSocket> Default for Client<S> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Idle),
                registry: Mutex::new(HandlerRegistry::default()),
                next_request_id: AtomicU8::new(0),
                on_error: Mutex::new(None),
                closed: CancellationToken::new(),
            }),
        }
    }
}

impl<S: DatagramSocket> Client<S> {
    /// Creates a client on an already connected socket and starts receiving.
    ///
    /// # Errors
    ///
    /// Returns an error if called outside of a tokio runtime.
    pub fn from_socket(socket: S) -> Result<Self> {
        let client = Self::default();
        client.open(socket)?;
        Ok(client)
    }

    /// Attaches an already connected socket and starts the receive loop.
    ///
    /// # Errors
    ///
    /// Returns `HseError::AlreadyOpen` if a socket is attached,
    /// `HseError::Closed` if the client was closed, or `HseError::Transport`
    /// if called outside of a tokio runtime.
    pub fn open(&self, socket: S) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(io::Error::other)?;
        let socket = Arc::new(socket);
        {
            let mut state = self.inner.state.lock();
            match *state {
                State::Idle => *state = State::Open(Arc::clone(&socket)),
                State::Open(_) => return Err(HseError::AlreadyOpen),
                State::Closed => return Err(HseError::Closed),
            }
        }

        debug!("session open, receiving");
        runtime.spawn(receive_loop(
            Arc::downgrade(&self.inner),
            socket,
            self.inner.closed.clone(),
        ));
        Ok(())
    }

    /// Closes the session.
    ///
    /// The socket is released, the receive loop stops without reading again
    /// and every registered handler is dropped without being invoked. Pending
    /// operations complete with `HseError::Closed`. Closing is idempotent and
    /// terminal.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Returns whether a socket is attached and the client is not closed.
    pub fn is_open(&self) -> bool {
        matches!(*self.inner.state.lock(), State::Open(_))
    }

    /// Returns the next request ID.
    ///
    /// IDs wrap after 255. Registering a handler for an ID that is still
    /// pending fails with `HseError::DuplicateRequestId`; the built-in
    /// operations skip pending IDs.
    pub fn next_request_id(&self) -> u8 {
        self.inner.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers `handler` for replies carrying `request_id`.
    ///
    /// The handler is invoked for every matching datagram until it is removed
    /// with [`remove_handler`](Self::remove_handler).
    ///
    /// # Errors
    ///
    /// Returns `HseError::DuplicateRequestId` if a handler is already
    /// registered for `request_id`; the existing registration is kept.
    /// Returns `HseError::Closed` after [`close`](Self::close).
    pub fn register_handler<F>(&self, request_id: u8, handler: F) -> Result<HandlerToken>
    where
        F: Fn(&ResponseHeader, &[u8]) + Send + Sync + 'static,
    {
        self.register_handler_with(request_id, |_| handler)
    }

    /// Registers a handler built from its own token.
    ///
    /// This lets a handler remove itself once its exchange is complete.
    ///
    /// A handler that captures a [`Client`] keeps the session alive while it
    /// is registered. Remove it when the exchange ends, or capture only what
    /// it needs; [`close`](Self::close) drops every remaining handler.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use yaskawa_hse::Client;
    /// # fn example(client: Client) -> yaskawa_hse::Result<()> {
    /// let id = client.next_request_id();
    /// let session = client.clone();
    /// client.register_handler_with(id, move |token| {
    ///     move |header: &yaskawa_hse::ResponseHeader, _payload: &[u8]| {
    ///         session.remove_handler(token);
    ///         println!("reply with status {}", header.status);
    ///     }
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Same as [`register_handler`](Self::register_handler).
    pub fn register_handler_with<B, F>(&self, request_id: u8, build: B) -> Result<HandlerToken>
    where
        B: FnOnce(HandlerToken) -> F,
        F: Fn(&ResponseHeader, &[u8]) + Send + Sync + 'static,
    {
        let token = self.inner.registry.lock().reserve(request_id)?;
        self.insert_handler(token, build)
    }

    /// Registers a handler under the next request ID that is not pending.
    ///
    /// IDs still held by long running exchanges are skipped, so a wrapped
    /// counter never collides with them.
    ///
    /// # Errors
    ///
    /// Returns `HseError::DuplicateRequestId` only if all 256 request IDs are
    /// pending, and `HseError::Closed` after [`close`](Self::close).
    pub(crate) fn register_next_with<B, F>(&self, build: B) -> Result<HandlerToken>
    where
        B: FnOnce(HandlerToken) -> F,
        F: Fn(&ResponseHeader, &[u8]) + Send + Sync + 'static,
    {
        let token = {
            let mut registry = self.inner.registry.lock();
            let mut reserved = registry.reserve(self.next_request_id());
            for _ in 0..u8::MAX {
                if reserved.is_ok() {
                    break;
                }
                reserved = registry.reserve(self.next_request_id());
            }
            reserved?
        };
        self.insert_handler(token, build)
    }

    fn insert_handler<B, F>(&self, token: HandlerToken, build: B) -> Result<HandlerToken>
    where
        B: FnOnce(HandlerToken) -> F,
        F: Fn(&ResponseHeader, &[u8]) + Send + Sync + 'static,
    {
        let request_id = token.request_id();
        let handler: ReplyHandler = Arc::new(build(token));

        let mut registry = self.inner.registry.lock();
        if self.inner.closed.is_cancelled() {
            return Err(HseError::Closed);
        }
        registry.insert(token, handler)?;
        trace!(request_id, pending = registry.len(), "handler registered");
        Ok(token)
    }

    /// Removes a registration.
    ///
    /// Returns `false` if the registration was already removed. Safe to call
    /// from inside the handler itself.
    pub fn remove_handler(&self, token: HandlerToken) -> bool {
        let removed = self.inner.registry.lock().remove(token);
        if removed {
            trace!(request_id = token.request_id(), "handler removed");
        }
        removed
    }

    /// Returns when the registration behind `token` was made, if it still exists.
    pub fn registered_at(&self, token: HandlerToken) -> Option<Instant> {
        self.inner.registry.lock().registered_at(token)
    }

    /// Returns the sorted request IDs that currently have a handler.
    pub fn pending_request_ids(&self) -> Vec<u8> {
        self.inner.registry.lock().request_ids()
    }

    /// Installs the observer for errors that belong to no pending request.
    ///
    /// The observer is called from the receive loop for transport errors,
    /// malformed datagrams and replies for unknown request IDs. It does not
    /// stop the loop.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&HseError) + Send + Sync + 'static,
    {
        *self.inner.on_error.lock() = Some(Arc::new(handler));
    }

    /// Removes the error observer.
    pub fn clear_error_handler(&self) {
        *self.inner.on_error.lock() = None;
    }

    /// Sends one datagram.
    ///
    /// # Errors
    ///
    /// Returns `HseError::NotConnected` before the client was opened,
    /// `HseError::Closed` after it was closed, or `HseError::Transport` if the
    /// socket fails.
    pub async fn send(&self, datagram: &[u8]) -> Result<()> {
        let socket = self.inner.socket()?;
        trace!(size = datagram.len(), "sending datagram");
        socket.send(datagram).await?;
        Ok(())
    }

    /// Sends a single-shot command and waits for its reply.
    ///
    /// A handler is registered under a fresh request ID before the request is
    /// sent. On the first matching reply it removes itself, checks the status,
    /// decodes the payload and completes this call. The registration is
    /// removed as well if sending fails, the timeout expires or the returned
    /// future is dropped.
    ///
    /// # Errors
    ///
    /// - `HseError::CommandFailed` if the controller rejected the command
    /// - `HseError::MalformedResponse` if the reply payload can not be decoded
    /// - `HseError::Timeout` if no reply arrived within `timeout`
    /// - `HseError::Transport` if sending failed
    /// - `HseError::Closed` if the client was closed while waiting
    pub async fn send_command<C: Command>(&self, command: C, timeout: Duration) -> Result<C::Response> {
        let description = command.describe();
        let command = Arc::new(command);

        let (tx, rx) = oneshot::channel();
        let reply = Mutex::new(Some(tx));
        let session = Arc::downgrade(&self.inner);
        let decoder = Arc::clone(&command);
        let token = self.register_next_with(move |token| {
            move |header: &ResponseHeader, payload: &[u8]| {
                let Some(reply) = reply.lock().take() else {
                    return;
                };
                if let Some(session) = session.upgrade() {
                    session.registry.lock().remove(token);
                }
                let result = header
                    .check_status()
                    .and_then(|()| decoder.decode_response(header, payload));
                let _ = reply.send(result);
            }
        })?;
        let _registration = Registration { client: self, token };
        let request_id = token.request_id();
        let datagram = command.encode(request_id)?;

        self.send(&datagram).await?;
        trace!(request_id, command = %description, "command sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HseError::Closed),
            Err(_) => Err(HseError::timeout(format!(
                "reply to request {request_id} ({description})"
            ))),
        }
    }

    /// Deletes a file on the controller.
    ///
    /// # Errors
    ///
    /// See [`send_command`](Self::send_command); also fails for invalid names.
    pub async fn delete_file(&self, name: &str, timeout: Duration) -> Result<()> {
        self.send_command(DeleteFile::new(name)?, timeout).await
    }

    /// Reads a variable of type `T` (`u8`, `i16`, `i32` or `f32`).
    pub async fn read_variable<T: Variable>(&self, index: u16, timeout: Duration) -> Result<T> {
        self.send_command(ReadVariable::<T>::new(index), timeout).await
    }

    /// Writes a variable of type `T` (`u8`, `i16`, `i32` or `f32`).
    pub async fn write_variable<T: Variable>(
        &self,
        index: u16,
        value: T,
        timeout: Duration,
    ) -> Result<()> {
        self.send_command(WriteVariable::new(index, value), timeout)
            .await
    }

    /// Reads a byte variable (B).
    pub async fn read_byte_variable(&self, index: u16, timeout: Duration) -> Result<u8> {
        self.read_variable(index, timeout).await
    }

    /// Writes a byte variable (B).
    pub async fn write_byte_variable(&self, index: u16, value: u8, timeout: Duration) -> Result<()> {
        self.write_variable(index, value, timeout).await
    }

    /// Reads an integer variable (I).
    pub async fn read_int16_variable(&self, index: u16, timeout: Duration) -> Result<i16> {
        self.read_variable(index, timeout).await
    }

    /// Writes an integer variable (I).
    pub async fn write_int16_variable(
        &self,
        index: u16,
        value: i16,
        timeout: Duration,
    ) -> Result<()> {
        self.write_variable(index, value, timeout).await
    }

    /// Reads a double integer variable (D).
    pub async fn read_int32_variable(&self, index: u16, timeout: Duration) -> Result<i32> {
        self.read_variable(index, timeout).await
    }

    /// Writes a double integer variable (D).
    pub async fn write_int32_variable(
        &self,
        index: u16,
        value: i32,
        timeout: Duration,
    ) -> Result<()> {
        self.write_variable(index, value, timeout).await
    }

    /// Reads a real variable (R).
    pub async fn read_float32_variable(&self, index: u16, timeout: Duration) -> Result<f32> {
        self.read_variable(index, timeout).await
    }

    /// Writes a real variable (R).
    pub async fn write_float32_variable(
        &self,
        index: u16,
        value: f32,
        timeout: Duration,
    ) -> Result<()> {
        self.write_variable(index, value, timeout).await
    }
}

impl<S: DatagramSocket> Inner<S> {
    fn check_idle(&self) -> Result<()> {
        match *self.state.lock() {
            State::Idle => Ok(()),
            State::Open(_) => Err(HseError::AlreadyOpen),
            State::Closed => Err(HseError::Closed),
        }
    }

    fn socket(&self) -> Result<Arc<S>> {
        match &*self.state.lock() {
            State::Idle => Err(HseError::NotConnected),
            State::Open(socket) => Ok(Arc::clone(socket)),
            State::Closed => Err(HseError::Closed),
        }
    }

    fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), State::Closed);
        self.closed.cancel();
        let handlers = self.registry.lock().drain();
        if !matches!(previous, State::Closed) {
            debug!(dropped_handlers = handlers.len(), "session closed");
        }
    }

    /// Processes one received datagram.
    fn dispatch(&self, datagram: &[u8]) {
        let header = match ResponseHeader::from_datagram(datagram) {
            Ok(header) => header,
            Err(error) => return self.report(error),
        };

        let on_reply = self.registry.lock().handler(header.request_id);
        let Some(on_reply) = on_reply else {
            return self.report(HseError::UnknownRequest {
                request_id: header.request_id,
            });
        };

        trace!(
            request_id = header.request_id,
            block_number = header.block_number,
            status = header.status,
            size = datagram.len(),
            "dispatching reply"
        );
        on_reply(&header, header.payload(datagram));
    }

    fn report(&self, error: HseError) {
        debug!(%error, "error without pending request");
        let observer = self.on_error.lock().clone();
        if let Some(observer) = observer {
            observer(&error);
        }
    }
}

impl<S> Drop for Inner<S> {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

async fn receive_loop<S: DatagramSocket>(
    session: Weak<Inner<S>>,
    socket: Arc<S>,
    closed: CancellationToken,
) {
    let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let received = tokio::select! {
            biased;
            () = closed.cancelled() => break,
            received = socket.recv(&mut buffer) => received,
        };

        // The read may have completed in the same step the session was closed.
        if closed.is_cancelled() {
            break;
        }
        let Some(session) = session.upgrade() else {
            break;
        };

        match received {
            Ok(size) => session.dispatch(&buffer[..size]),
            Err(error) => session.report(HseError::Transport(error)),
        }
    }
    debug!("receive loop stopped");
}

/// Removes a registration when the owning operation ends.
pub(crate) struct Registration<'a, S: DatagramSocket> {
    pub(crate) client: &'a Client<S>,
    pub(crate) token: HandlerToken,
}

impl<S: DatagramSocket> Drop for Registration<'_, S> {
    fn drop(&mut self) {
        self.client.remove_handler(self.token);
    }
}

impl<S> std::fmt::Debug for Client<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.inner.state.lock() {
            State::Idle => "idle",
            State::Open(_) => "open",
            State::Closed => "closed",
        };
        f.debug_struct("Client")
            .field("state", &state)
            .field("registry", &*self.inner.registry.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Division;
    use crate::testing::{mock_pair, next, response, response_in, MockController, MockSocket};
    use tokio::sync::mpsc;

    fn kind(error: &HseError) -> &'static str {
        match error {
            HseError::Transport(_) => "transport",
            HseError::MalformedResponse { .. } => "decode",
            HseError::UnknownRequest { .. } => "unknown",
            _ => "other",
        }
    }

    fn observe<S: DatagramSocket>(client: &Client<S>) -> mpsc::UnboundedReceiver<&'static str> {
        let (tx, rx) = mpsc::unbounded_channel();
        client.set_error_handler(move |error| {
            let _ = tx.send(kind(error));
        });
        rx
    }

    fn recorder<S: DatagramSocket>(
        client: &Client<S>,
        request_id: u8,
    ) -> (HandlerToken, mpsc::UnboundedReceiver<(ResponseHeader, Vec<u8>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = client
            .register_handler(request_id, move |header, payload| {
                let _ = tx.send((*header, payload.to_vec()));
            })
            .unwrap();
        (token, rx)
    }

    fn open() -> (Client<MockSocket>, MockController) {
        let (socket, controller) = mock_pair();
        (Client::from_socket(socket).unwrap(), controller)
    }

    #[test]
    fn test_client_config_new() {
        let config = ClientConfig::new("10.0.0.2");

        assert_eq!(config.host, "10.0.0.2");
        assert_eq!(config.port, DEFAULT_HSE_PORT);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_client_config_builders() {
        let config = ClientConfig::new("robot.local")
            .with_port(10041)
            .with_timeout(Duration::from_secs(5));

        assert_eq!(config.port, 10041);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_client_config_from_json() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"host":"10.0.0.2","port":10041,"timeout":{"secs":1,"nanos":500000000}}"#,
        )
        .unwrap();

        assert_eq!(
            config,
            ClientConfig::new("10.0.0.2")
                .with_port(10041)
                .with_timeout(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_request_id_increment_and_wrap() {
        let client = Client::<MockSocket>::default();

        assert_eq!(client.next_request_id(), 0);
        assert_eq!(client.next_request_id(), 1);
        for _ in 2..=255 {
            client.next_request_id();
        }
        assert_eq!(client.next_request_id(), 0);
    }

    #[test]
    fn test_reply_only_reaches_its_own_handler() {
        let client = Client::<MockSocket>::default();
        let (_a, mut rx_a) = recorder(&client, 1);
        let (_b, mut rx_b) = recorder(&client, 2);

        client.inner.dispatch(&response(1, 0, 0, b"for a"));

        let (header, payload) = rx_a.try_recv().unwrap();
        assert_eq!(header.request_id, 1);
        assert_eq!(payload, b"for a");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_duplicate_registration_keeps_original() {
        let client = Client::<MockSocket>::default();
        let (token, mut rx) = recorder(&client, 3);

        let result = client.register_handler(3, |_, _| panic!("must not be called"));
        assert!(matches!(
            result,
            Err(HseError::DuplicateRequestId { request_id: 3 })
        ));

        client.inner.dispatch(&response(3, 0, 0, b""));
        assert!(rx.try_recv().is_ok());
        assert!(client.remove_handler(token));
    }

    #[test]
    fn test_unknown_request_reported_once() {
        let client = Client::<MockSocket>::default();
        let (_token, mut handled) = recorder(&client, 1);
        let mut errors = observe(&client);

        client.inner.dispatch(&response(42, 0, 0, b""));

        assert_eq!(errors.try_recv().unwrap(), "unknown");
        assert!(errors.try_recv().is_err());
        assert!(handled.try_recv().is_err());
    }

    #[test]
    fn test_registration_scenario() {
        let client = Client::<MockSocket>::default();
        let (token, mut rx) = recorder(&client, 5);
        assert!(client.registered_at(token).is_some());
        assert_eq!(client.pending_request_ids(), vec![5]);

        client.inner.dispatch(&response(5, 0, 0, b"ok"));

        let (header, payload) = rx.try_recv().unwrap();
        assert_eq!(header.request_id, 5);
        assert!(header.is_success());
        assert_eq!(payload, b"ok");
        assert!(rx.try_recv().is_err());

        assert!(client.remove_handler(token));
        assert!(client.pending_request_ids().is_empty());
        assert!(client.registered_at(token).is_none());
    }

    #[test]
    fn test_handler_can_remove_itself() {
        let client = Client::<MockSocket>::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = client.clone();
        client
            .register_handler_with(8, move |token| {
                move |header: &ResponseHeader, _: &[u8]| {
                    assert!(session.remove_handler(token));
                    let _ = tx.send(header.request_id);
                }
            })
            .unwrap();

        let mut errors = observe(&client);
        client.inner.dispatch(&response(8, 0, 0, b""));
        client.inner.dispatch(&response(8, 0, 0, b""));

        assert_eq!(rx.try_recv().unwrap(), 8);
        assert!(rx.try_recv().is_err());
        assert_eq!(errors.try_recv().unwrap(), "unknown");
        // The removed handler released its captured client.
        assert_eq!(Arc::strong_count(&client.inner), 1);
    }

    #[test]
    fn test_state_errors() {
        let client = Client::<MockSocket>::default();
        assert!(!client.is_open());

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            assert!(matches!(client.send(b"x").await, Err(HseError::NotConnected)));

            let (socket, _controller) = mock_pair();
            client.open(socket).unwrap();
            assert!(client.is_open());

            let (socket, _controller) = mock_pair();
            assert!(matches!(client.open(socket), Err(HseError::AlreadyOpen)));

            client.close();
            assert!(!client.is_open());
            assert!(matches!(client.send(b"x").await, Err(HseError::Closed)));

            let (socket, _controller) = mock_pair();
            assert!(matches!(client.open(socket), Err(HseError::Closed)));
            assert!(matches!(
                client.register_handler(1, |_, _| {}),
                Err(HseError::Closed)
            ));
        });
    }

    #[test]
    fn test_open_outside_runtime_fails() {
        let (socket, _controller) = mock_pair();
        let client = Client::<MockSocket>::default();
        assert!(matches!(client.open(socket), Err(HseError::Transport(_))));
        assert!(!client.is_open());
    }

    #[tokio::test]
    async fn test_decode_failure_does_not_stop_loop() {
        let (client, controller) = open();
        let mut errors = observe(&client);
        let (_token, mut rx) = recorder(&client, 1);

        controller.inject(b"garbage".to_vec());
        controller.inject(response(1, 0, 0, b"after"));

        let (_, payload) = next(&mut rx).await;
        assert_eq!(payload, b"after");
        assert_eq!(errors.try_recv().unwrap(), "decode");
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_transport_error_rearms() {
        let (client, controller) = open();
        let mut errors = observe(&client);
        let (_token, mut rx) = recorder(&client, 1);

        controller.inject_error(io::ErrorKind::ConnectionReset);
        controller.inject(response(1, 0, 0, b"still here"));

        let (_, payload) = next(&mut rx).await;
        assert_eq!(payload, b"still here");
        assert_eq!(errors.try_recv().unwrap(), "transport");
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_streaming_delivery_in_arrival_order() {
        let (client, controller) = open();
        let (_token, mut rx) = recorder(&client, 9);

        controller.inject(response(9, 0, 1, b"first"));
        controller.inject(response(9, 0, 2, b"second"));

        assert_eq!(next(&mut rx).await.1, b"first");
        assert_eq!(next(&mut rx).await.1, b"second");
        assert_eq!(client.pending_request_ids(), vec![9]);
    }

    #[tokio::test]
    async fn test_close_stops_delivery() {
        let (client, controller) = open();
        let mut errors = observe(&client);
        let (token, mut rx) = recorder(&client, 1);

        // Let the loop arm its read before closing.
        tokio::task::yield_now().await;
        client.close();
        controller.inject(response(1, 0, 0, b"late"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(rx.recv().await.is_none());
        assert!(errors.try_recv().is_err());
        assert!(!client.remove_handler(token));
    }

    #[tokio::test]
    async fn test_handler_closing_session_stops_loop() {
        let (client, controller) = open();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = client.clone();
        client
            .register_handler(2, move |_, payload| {
                let _ = tx.send(payload.to_vec());
                session.close();
            })
            .unwrap();
        let mut errors = observe(&client);

        controller.inject(response(2, 0, 0, b"bye"));
        controller.inject(response(2, 0, 0, b"ignored"));

        assert_eq!(next(&mut rx).await, b"bye");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.recv().await.is_none());
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_command_success() {
        let (client, mut controller) = open();

        let task = tokio::spawn({
            let client = client.clone();
            async move { client.read_int16_variable(6, Duration::from_secs(1)).await }
        });

        let request = controller.next_sent().await;
        let request_id = request[11];
        assert_eq!(&request[24..26], &0x7Bu16.to_le_bytes());
        controller.inject(response_in(Division::Robot, request_id, 0, 0, &(-5i16).to_le_bytes()));

        assert_eq!(task.await.unwrap().unwrap(), -5);
        assert!(client.pending_request_ids().is_empty());
    }

    #[tokio::test]
    async fn test_send_command_failure_status() {
        let (client, mut controller) = open();
        let mut errors = observe(&client);

        let task = tokio::spawn({
            let client = client.clone();
            async move { client.delete_file("MISSING.JBI", Duration::from_secs(1)).await }
        });

        let request = controller.next_sent().await;
        let request_id = request[11];
        controller.inject(response(request_id, 0x08, 0, b""));

        match task.await.unwrap() {
            Err(HseError::CommandFailed { status, .. }) => assert_eq!(status, 0x08),
            other => panic!("Expected CommandFailed, got {other:?}"),
        }
        assert!(client.pending_request_ids().is_empty());

        // The handler is gone: a repeated reply is unknown.
        controller.inject(response(request_id, 0x08, 0, b""));
        assert_eq!(next(&mut errors).await, "unknown");
    }

    #[tokio::test]
    async fn test_send_command_skips_pending_request_id() {
        let (client, mut controller) = open();
        let held = client.next_request_id();
        let (token, _rx) = recorder(&client, held);
        for _ in 0..u8::MAX {
            client.next_request_id();
        }

        let task = tokio::spawn({
            let client = client.clone();
            async move { client.read_byte_variable(5, Duration::from_secs(1)).await }
        });

        let request = controller.next_sent().await;
        assert_eq!(request[11], held.wrapping_add(1));
        controller.inject(response_in(Division::Robot, request[11], 0, 0, &[0x2A]));

        assert_eq!(task.await.unwrap().unwrap(), 0x2A);
        assert_eq!(client.pending_request_ids(), vec![held]);
        assert!(client.remove_handler(token));
    }

    #[tokio::test]
    async fn test_send_command_all_request_ids_pending() {
        let (client, mut controller) = open();
        for id in 0..=u8::MAX {
            client.register_handler(id, |_, _| {}).unwrap();
        }

        let result = client.read_byte_variable(5, Duration::from_secs(1)).await;

        assert!(matches!(result, Err(HseError::DuplicateRequestId { .. })));
        assert!(controller.try_next_sent().is_none());
        assert_eq!(client.pending_request_ids().len(), 256);
    }

    #[tokio::test]
    async fn test_send_command_timeout_removes_handler() {
        let (client, mut controller) = open();

        let result = client
            .write_byte_variable(5, 1, Duration::from_millis(20))
            .await;

        assert!(matches!(result, Err(HseError::Timeout { .. })));
        assert!(controller.try_next_sent().is_some());
        assert!(client.pending_request_ids().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_removes_handler() {
        let (client, controller) = open();
        controller.fail_sends(true);

        let result = client.read_byte_variable(5, Duration::from_secs(1)).await;

        assert!(matches!(result, Err(HseError::Transport(_))));
        assert!(client.pending_request_ids().is_empty());
    }

    #[tokio::test]
    async fn test_close_wakes_pending_command() {
        let (client, mut controller) = open();

        let task = tokio::spawn({
            let client = client.clone();
            async move { client.read_float32_variable(8, Duration::from_secs(5)).await }
        });
        controller.next_sent().await;
        client.close();

        assert!(matches!(task.await.unwrap(), Err(HseError::Closed)));
    }

    #[tokio::test]
    async fn test_connect_and_delete_over_loopback() {
        let controller = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = controller.local_addr().unwrap().port();

        let client = Client::new();
        client
            .connect_with(&ClientConfig::new("127.0.0.1").with_port(port))
            .await
            .unwrap();
        assert!(client.is_open());

        let task = tokio::spawn({
            let client = client.clone();
            async move { client.delete_file("OLD.JBI", Duration::from_secs(1)).await }
        });

        let mut buffer = [0u8; 512];
        let (size, from) = controller.recv_from(&mut buffer).await.unwrap();
        assert_eq!(&buffer[32..size], b"OLD.JBI");
        controller
            .send_to(&response(buffer[11], 0, 0, b""), from)
            .await
            .unwrap();

        task.await.unwrap().unwrap();
        client.close();
        assert!(matches!(
            client.connect("127.0.0.1", port, DEFAULT_TIMEOUT).await,
            Err(HseError::Closed)
        ));
    }

    #[test]
    fn test_client_debug() {
        let client = Client::<MockSocket>::default();
        let debug_str = format!("{:?}", client);
        assert!(debug_str.contains("Client"));
        assert!(debug_str.contains("idle"));
    }
}
