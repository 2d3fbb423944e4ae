//! Session lifecycle management.
//!
//! [`SessionManager`] is a handle to a task that owns one session. The task
//! registers the session, heartbeats it every half session timeout, follows
//! leader changes reported by the cluster and unregisters it on close.
//!
//! # Failure handling
//!
//! Registration failures are delegated to the configured
//! [`ConnectionStrategy`]. Keep-alive and unregister failures are handled
//! here and never reach callers:
//!
//! - `UNKNOWN_SESSION` expires the session.
//! - Any other failure while a leader is known clears the leader hint and
//!   resends immediately, so the next request may reach every member.
//! - Any other failure without a known leader marks the session unstable
//!   and tries again one interval later.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use skiff_protocol::{
	ErrorType, KeepAliveRequest, KeepAliveResponse, RegisterRequest, RegisterResponse, Request, StatusResponse, UnregisterRequest,
	UnregisterResponse,
};
use skiff_runtime::{AddressSelector, Connection, RpcCall};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::context::{Scheduled, SessionContext, take_fired};
use crate::state::{SessionState, SessionStatus};
use crate::strategy::{AttemptFailure, ConnectionStrategy, RegisterAttempt, RetryDecision};
use crate::{Error, Result};

type Waiter = oneshot::Sender<Result<()>>;

/// Resolves when an `open` or `close` request completes.
#[must_use = "completions do nothing unless awaited"]
#[derive(Debug)]
pub struct Completion {
	rx: oneshot::Receiver<Result<()>>,
}

impl Future for Completion {
	type Output = Result<()>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut self.rx)
			.poll(cx)
			.map(|result| result.unwrap_or_else(|_| Err(Error::ManagerStopped)))
	}
}

enum Command {
	Open(Waiter),
	Close(Waiter),
}

#[derive(Debug, Clone, Copy)]
enum TimerPurpose {
	KeepAlive,
	Unregister,
	Register { attempt: u32 },
}

enum Event {
	Timer { id: u64, purpose: TimerPurpose },
	Registered { attempt: u32, result: skiff_runtime::Result<RegisterResponse> },
	KeptAlive(skiff_runtime::Result<KeepAliveResponse>),
	Unregistered(skiff_runtime::Result<UnregisterResponse>),
}

/// How a keep-alive or unregister outcome is handled.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
	Ok,
	UnknownSession,
	Failed,
}

impl Outcome {
	fn of<R: StatusResponse>(result: &skiff_runtime::Result<R>) -> Self {
		match result {
			Ok(response) if response.is_ok() => Self::Ok,
			Ok(response) if response.error() == Some(ErrorType::UnknownSession) => Self::UnknownSession,
			_ => Self::Failed,
		}
	}
}

/// Handle to a running session.
///
/// Clones share the same session. The session task stops once every handle
/// is dropped and no `open`/`close` completion is outstanding.
#[derive(Clone)]
pub struct SessionManager {
	commands: mpsc::UnboundedSender<Command>,
	state: SessionState,
	selector: Arc<AddressSelector>,
}

impl SessionManager {
	/// Spawns a session manager on the current tokio runtime.
	pub fn new(connection: impl Connection, selector: Arc<AddressSelector>, config: SessionConfig) -> Self {
		Self::builder(connection, selector).with_config(config).spawn()
	}

	pub fn builder(connection: impl Connection, selector: Arc<AddressSelector>) -> SessionManagerBuilder {
		SessionManagerBuilder {
			connection: Arc::new(connection),
			selector,
			config: SessionConfig::default(),
			state: None,
			strategy: None,
		}
	}

	/// Registers the session.
	///
	/// Resolves once registration succeeds, or with the strategy's error once
	/// it gives up. Joins a registration already in progress and resolves
	/// immediately when the session is open.
	pub fn open(&self) -> Completion {
		self.submit(Command::Open)
	}

	/// Unregisters the session.
	///
	/// Resolves once the session is closed or known to be expired. Unregister
	/// failures are retried until one of those holds.
	pub fn close(&self) -> Completion {
		self.submit(Command::Close)
	}

	pub fn status(&self) -> Option<SessionStatus> {
		self.state.status()
	}

	pub fn session_id(&self) -> Option<u64> {
		self.state.session_id()
	}

	pub fn state(&self) -> &SessionState {
		&self.state
	}

	pub fn selector(&self) -> &Arc<AddressSelector> {
		&self.selector
	}

	/// Subscribes to status changes, including ones no caller asked for.
	pub fn watch(&self) -> watch::Receiver<Option<SessionStatus>> {
		self.state.watch()
	}

	fn submit(&self, command: impl FnOnce(Waiter) -> Command) -> Completion {
		let (tx, rx) = oneshot::channel();
		// A stopped manager drops the sender, which resolves the completion.
		let _ = self.commands.send(command(tx));
		Completion { rx }
	}
}

/// Configures a [`SessionManager`] before spawning it.
pub struct SessionManagerBuilder {
	connection: Arc<dyn Connection>,
	selector: Arc<AddressSelector>,
	config: SessionConfig,
	state: Option<SessionState>,
	strategy: Option<Arc<dyn ConnectionStrategy>>,
}

impl SessionManagerBuilder {
	pub fn with_config(mut self, config: SessionConfig) -> Self {
		self.config = config;
		self
	}

	/// Uses existing session state instead of one built from the config.
	pub fn with_state(mut self, state: SessionState) -> Self {
		self.state = Some(state);
		self
	}

	/// Overrides the config's strategy.
	pub fn with_strategy(mut self, strategy: impl ConnectionStrategy) -> Self {
		let strategy: Arc<dyn ConnectionStrategy> = Arc::new(strategy);
		self.strategy = Some(strategy);
		self
	}

	pub fn spawn(self) -> SessionManager {
		let state = self.state.unwrap_or_else(|| self.config.session_state());
		let strategy = self.strategy.unwrap_or_else(|| self.config.strategy.build());
		let (commands, commands_rx) = mpsc::unbounded_channel();
		let (context, events_rx) = SessionContext::new();

		let session = Session {
			connection: self.connection,
			selector: Arc::clone(&self.selector),
			state: state.clone(),
			strategy,
			request_timeout: self.config.request_timeout(),
			context,
			interval: Duration::ZERO,
			registering: false,
			closing: false,
			open_waiters: Vec::new(),
			close_waiters: Vec::new(),
			keep_alive_timer: None,
			unregister_timer: None,
			register_timer: None,
		};
		tokio::spawn(session.run(commands_rx, events_rx));

		SessionManager {
			commands,
			state,
			selector: self.selector,
		}
	}
}

/// The session task. Only this task writes session status.
struct Session {
	connection: Arc<dyn Connection>,
	selector: Arc<AddressSelector>,
	state: SessionState,
	strategy: Arc<dyn ConnectionStrategy>,
	request_timeout: Duration,
	context: SessionContext<Event>,
	/// Half the server-advertised session timeout.
	interval: Duration,
	/// A register request is in flight.
	registering: bool,
	/// `close` has been requested.
	closing: bool,
	open_waiters: Vec<Waiter>,
	close_waiters: Vec<Waiter>,
	keep_alive_timer: Option<Scheduled>,
	unregister_timer: Option<Scheduled>,
	register_timer: Option<Scheduled>,
}

impl Session {
	async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, mut events: mpsc::UnboundedReceiver<Event>) {
		let mut detached = false;
		loop {
			if detached && self.open_waiters.is_empty() && self.close_waiters.is_empty() {
				break;
			}
			tokio::select! {
				biased;
				command = commands.recv(), if !detached => match command {
					Some(Command::Open(waiter)) => self.on_open(waiter),
					Some(Command::Close(waiter)) => self.on_close(waiter),
					None => detached = true,
				},
				Some(event) = events.recv() => self.on_event(event),
			}
		}
		debug!(target = "skiff.session", session = ?self.state.session_id(), "session task stopped");
	}

	fn on_event(&mut self, event: Event) {
		match event {
			Event::Timer { id, purpose } => self.on_timer(id, purpose),
			Event::Registered { attempt, result } => self.on_registered(attempt, result),
			Event::KeptAlive(result) => self.on_keep_alive(result),
			Event::Unregistered(result) => self.on_unregistered(result),
		}
	}

	fn on_timer(&mut self, id: u64, purpose: TimerPurpose) {
		match purpose {
			TimerPurpose::KeepAlive => {
				if take_fired(&mut self.keep_alive_timer, id) && !self.closing {
					self.keep_alive();
				}
			}
			TimerPurpose::Unregister => {
				if take_fired(&mut self.unregister_timer, id) {
					self.unregister();
				}
			}
			TimerPurpose::Register { attempt } => {
				if take_fired(&mut self.register_timer, id) && !self.closing {
					self.register(attempt);
				}
			}
		}
	}

	/// Sends `request` bounded by the request timeout; `event` wraps the outcome.
	fn send<R, F>(&self, request: R, event: F)
	where
		R: RpcCall,
		F: FnOnce(skiff_runtime::Result<R::Response>) -> Event + Send + 'static,
	{
		let connection = Arc::clone(&self.connection);
		let timeout = self.request_timeout;
		self.context.spawn(async move {
			let request: Request = request.into();
			let method = request.method();
			let result = match tokio::time::timeout(timeout, connection.send(request)).await {
				Ok(response) => response.and_then(R::expect_response),
				Err(_) => Err(skiff_runtime::Error::Timeout(format!("{method} after {}ms", timeout.as_millis()))),
			};
			debug!(target = "skiff.session", method, ok = result.is_ok(), "response received");
			event(result)
		});
	}

	fn on_open(&mut self, waiter: Waiter) {
		match self.state.status() {
			Some(SessionStatus::Open | SessionStatus::Unstable) if !self.closing => {
				let _ = waiter.send(Ok(()));
			}
			Some(SessionStatus::Expired) => {
				let _ = waiter.send(Err(Error::SessionExpired));
			}
			Some(_) => {
				let _ = waiter.send(Err(Error::SessionClosed));
			}
			None if self.closing => {
				let _ = waiter.send(Err(Error::SessionClosed));
			}
			None => {
				self.open_waiters.push(waiter);
				if !self.registering && self.register_timer.is_none() {
					self.register(1);
				}
			}
		}
	}

	fn register(&mut self, attempt: u32) {
		self.registering = true;
		let client = self.state.client_id().to_string();
		debug!(target = "skiff.session", attempt, %client, "sending register request");
		self.send(RegisterRequest { client }, move |result| Event::Registered { attempt, result });
	}

	fn on_registered(&mut self, attempt: u32, result: skiff_runtime::Result<RegisterResponse>) {
		self.registering = false;
		let failure = match result {
			Ok(response) if response.is_ok() && response.timeout > 0 => return self.registered(response),
			Ok(response) if response.is_ok() => {
				warn!(target = "skiff.session", session = response.session, "register response without session timeout");
				AttemptFailure::Rejected(None)
			}
			Ok(response) => AttemptFailure::Rejected(response.error()),
			Err(err) => AttemptFailure::Connection(err),
		};
		debug!(target = "skiff.session", attempt, %failure, "register attempt failed");

		if self.closing {
			// Closed before a session existed; nothing to unregister.
			self.state.set_status(SessionStatus::Closed);
			complete_all(&mut self.close_waiters);
			return;
		}

		let next = next_attempt(attempt);
		match self.strategy.attempt_failed(&RegisterAttempt { number: attempt, failure }) {
			RetryDecision::Now => self.register(next),
			RetryDecision::After(delay) => {
				debug!(target = "skiff.session", attempt = next, ?delay, "scheduling register retry");
				self.register_timer = Some(self.context.schedule(delay, move |id| Event::Timer {
					id,
					purpose: TimerPurpose::Register { attempt: next },
				}));
			}
			RetryDecision::Fail(error) => {
				let error = error.unwrap_or_else(Error::registration_failed);
				warn!(target = "skiff.session", attempt, error = %error, "giving up on registration");
				fail_all(&mut self.open_waiters, error);
			}
		}
	}

	fn registered(&mut self, response: RegisterResponse) {
		self.interval = Duration::from_millis(response.timeout) / 2;
		self.selector.reset(response.leader, response.members);
		self.state.set_session_id(response.session);
		self.state.set_status(SessionStatus::Open);
		info!(
			target = "skiff.session",
			session = response.session,
			interval_ms = self.interval.as_millis() as u64,
			"session registered"
		);

		if self.closing {
			self.unregister();
			return;
		}
		complete_all(&mut self.open_waiters);
		self.schedule_keep_alive();
	}

	fn schedule_keep_alive(&mut self) {
		self.keep_alive_timer = Some(self.context.schedule(self.interval, |id| Event::Timer {
			id,
			purpose: TimerPurpose::KeepAlive,
		}));
	}

	fn keep_alive(&mut self) {
		let Some(session) = self.state.session_id() else {
			return;
		};
		let request = KeepAliveRequest {
			session,
			command_sequence: self.state.command_response(),
			event_index: self.state.complete_index(),
		};
		debug!(
			target = "skiff.session",
			session,
			command_sequence = request.command_sequence,
			event_index = request.event_index,
			"sending keep-alive"
		);
		self.send(request, Event::KeptAlive);
	}

	fn on_keep_alive(&mut self, result: skiff_runtime::Result<KeepAliveResponse>) {
		let live = matches!(self.state.status(), Some(SessionStatus::Open | SessionStatus::Unstable));
		if self.closing || !live {
			debug!(target = "skiff.session", "ignoring keep-alive response");
			return;
		}

		match Outcome::of(&result) {
			Outcome::Ok => {
				if let Ok(response) = result {
					debug!(target = "skiff.session", leader = ?response.leader, "keep-alive acknowledged");
					self.selector.reset(response.leader, response.members);
				}
				if self.state.set_status(SessionStatus::Open) {
					info!(target = "skiff.session", "session stable again");
				}
				self.schedule_keep_alive();
			}
			Outcome::UnknownSession => {
				warn!(target = "skiff.session", session = ?self.state.session_id(), "session expired");
				self.state.set_status(SessionStatus::Expired);
				self.cancel_timers();
			}
			Outcome::Failed => {
				if let Err(err) = &result {
					debug!(target = "skiff.session", error = %err, "keep-alive failed");
				}
				if let Some(leader) = self.selector.leader() {
					warn!(target = "skiff.session", %leader, "keep-alive failed; clearing leader");
					self.selector.clear_leader();
					self.keep_alive();
				} else {
					if self.state.set_status(SessionStatus::Unstable) {
						warn!(target = "skiff.session", "session unstable");
					}
					self.schedule_keep_alive();
				}
			}
		}
	}

	fn on_close(&mut self, waiter: Waiter) {
		if self.state.status().is_some_and(SessionStatus::is_terminal) {
			let _ = waiter.send(Ok(()));
			return;
		}
		self.close_waiters.push(waiter);
		if self.closing {
			return;
		}
		self.closing = true;
		self.keep_alive_timer = None;

		if self.state.session_id().is_some() {
			self.unregister();
			return;
		}

		fail_all(&mut self.open_waiters, Error::SessionClosed);
		if self.registering {
			debug!(target = "skiff.session", "close requested during registration");
			return;
		}
		self.register_timer = None;
		self.state.set_status(SessionStatus::Closed);
		complete_all(&mut self.close_waiters);
	}

	fn unregister(&mut self) {
		self.keep_alive_timer = None;
		self.unregister_timer = None;
		let Some(session) = self.state.session_id() else {
			return;
		};
		debug!(target = "skiff.session", session, "sending unregister request");
		self.send(UnregisterRequest { session }, Event::Unregistered);
	}

	fn on_unregistered(&mut self, result: skiff_runtime::Result<UnregisterResponse>) {
		if self.state.status().is_some_and(SessionStatus::is_terminal) {
			debug!(target = "skiff.session", "ignoring unregister response");
			return;
		}

		match Outcome::of(&result) {
			Outcome::Ok => {
				info!(target = "skiff.session", session = ?self.state.session_id(), "session closed");
				self.finish_close(SessionStatus::Closed);
			}
			Outcome::UnknownSession => {
				info!(target = "skiff.session", session = ?self.state.session_id(), "session already expired");
				self.finish_close(SessionStatus::Expired);
			}
			Outcome::Failed => {
				if let Err(err) = &result {
					debug!(target = "skiff.session", error = %err, "unregister failed");
				}
				if let Some(leader) = self.selector.leader() {
					warn!(target = "skiff.session", %leader, "unregister failed; clearing leader");
					self.selector.clear_leader();
					self.unregister();
				} else {
					self.state.set_status(SessionStatus::Unstable);
					self.unregister_timer = Some(self.context.schedule(self.interval, |id| Event::Timer {
						id,
						purpose: TimerPurpose::Unregister,
					}));
				}
			}
		}
	}

	fn finish_close(&mut self, status: SessionStatus) {
		self.state.set_status(status);
		self.cancel_timers();
		complete_all(&mut self.close_waiters);
	}

	fn cancel_timers(&mut self) {
		self.keep_alive_timer = None;
		self.unregister_timer = None;
		self.register_timer = None;
	}
}

fn complete_all(waiters: &mut Vec<Waiter>) {
	for waiter in waiters.drain(..) {
		let _ = waiter.send(Ok(()));
	}
}

/// Fails every waiter; the first receives `error` itself.
fn fail_all(waiters: &mut Vec<Waiter>, error: Error) {
	let mut waiters = waiters.drain(..);
	let Some(first) = waiters.next() else {
		return;
	};
	for waiter in waiters {
		let _ = waiter.send(Err(echo(&error)));
	}
	let _ = first.send(Err(error));
}

/// Same-kind error for additional waiters, since [`Error`] is not `Clone`.
fn echo(error: &Error) -> Error {
	match error {
		Error::SessionClosed => Error::SessionClosed,
		Error::SessionExpired => Error::SessionExpired,
		other => Error::RegistrationFailed(other.to_string()),
	}
}

fn next_attempt(attempt: u32) -> u32 {
	attempt.saturating_add(1)
}
