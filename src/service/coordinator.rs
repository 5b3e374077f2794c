//! Request/response coordination.
//!
//! A request moves through `Sent -> AwaitingWireAck -> AwaitingReply -> Done`. The
//! modem echo (ACK/NAK) settles the wire phase; device-directed commands then wait for
//! a direct ACK or NAK from the device. A device reply seen before the echo also
//! settles the request.
//!
//! Both waits use owned bus subscriptions held for the lifetime of the attempt, so
//! dropping the future unsubscribes and cancels its deadlines.

use crate::config::RequestConfig;
use crate::core::flags::MessageType;
use crate::core::message::Message;
use crate::error::{ProtocolError, Result};
use crate::protocol::bus::{Event, Subscription};
use crate::protocol::commands::Command;
use crate::protocol::correlation::CorrelationTable;
use crate::protocol::topic::{EventKind, NamePattern, Segment, TopicPattern};
use crate::service::connection::Connection;
use crate::service::queue::Priority;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

/// Direct NAK reason: the device is a responder with no load attached.
pub const NAK_NO_LOAD: u8 = 0xFE;
/// Direct NAK reason: extended message checksum mismatch.
pub const NAK_CHECKSUM: u8 = 0xFD;
/// Direct NAK reason: sender is not in the device's link database.
pub const NAK_NOT_LINKED: u8 = 0xFF;
/// Direct NAK reason: the device has no room for the request.
pub const NAK_PRE_NAK: u8 = 0xFC;

/// Final status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    Success,
    Failure,
    /// The device may or may not have acted.
    Unclear,
    /// The modem never confirmed the frame went out.
    Unsent,
}

/// Outcome of [`Coordinator::send`].
#[derive(Debug, Clone)]
pub struct Response {
    pub status: ResponseStatus,
    /// The frame that settled the request: device reply, or modem echo for
    /// modem-level commands and NAKs.
    pub reply: Option<Arc<Message>>,
}

impl Response {
    fn new(status: ResponseStatus, reply: Option<Arc<Message>>) -> Self {
        Self { status, reply }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Whether the device answered with a direct NAK.
    pub fn is_device_nak(&self) -> bool {
        self.reply
            .as_ref()
            .and_then(|reply| reply.insteon())
            .is_some_and(|insteon| insteon.flags.message_type == MessageType::DirectNak)
    }

    /// The settling frame of a successful request, or the error describing why the
    /// request did not succeed.
    pub fn require(self, operation: &'static str) -> Result<Arc<Message>> {
        match (self.status, self.reply) {
            (ResponseStatus::Success, Some(reply)) => Ok(reply),
            (ResponseStatus::Unsent, _) | (ResponseStatus::Success, None) => {
                Err(ProtocolError::Timeout)
            }
            (ResponseStatus::Failure, None) => Err(ProtocolError::Timeout),
            _ => Err(ProtocolError::Nak { operation }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    Sent,
    AwaitingWireAck,
    AwaitingReply,
    Done,
}

/// Result of one attempt plus whether another attempt may help.
struct Attempt {
    response: Response,
    retry: bool,
}

impl Attempt {
    fn done(response: Response) -> Self {
        Self {
            response,
            retry: false,
        }
    }

    fn retry(response: Response) -> Self {
        Self {
            response,
            retry: true,
        }
    }
}

/// Per-send overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    pub priority: Priority,
    /// Resends after the first attempt.
    pub retries: u32,
}

/// Sends typed commands and waits for their answers.
#[derive(Debug, Clone)]
pub struct Coordinator {
    connection: Connection,
    config: RequestConfig,
}

impl Coordinator {
    pub fn new(connection: Connection) -> Self {
        let config = connection.config().request.clone();
        Self { connection, config }
    }

    pub fn with_config(mut self, config: RequestConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    pub fn default_options(&self) -> SendOptions {
        SendOptions {
            priority: Priority::Interactive,
            retries: self.config.max_retries,
        }
    }

    /// Send with the configured retry policy at interactive priority.
    pub async fn send(&self, command: &Command) -> Result<Response> {
        self.send_with(command, self.default_options()).await
    }

    /// Send, retrying failures and deadline expiry up to `options.retries` times.
    /// `Unclear` is never retried. Errors are reserved for invalid commands and a
    /// closed connection.
    #[instrument(skip(self, command), fields(operation = command.name(), address = ?command.address()))]
    pub async fn send_with(&self, command: &Command, options: SendOptions) -> Result<Response> {
        let message = command.to_message()?;
        let mut attempt_no = 0;
        loop {
            let attempt = self.attempt(command, &message, options.priority).await?;
            if !attempt.retry || attempt_no >= options.retries {
                debug!(status = ?attempt.response.status, attempts = attempt_no + 1, "Request settled");
                return Ok(attempt.response);
            }
            attempt_no += 1;
            warn!(
                status = ?attempt.response.status,
                attempt = attempt_no,
                "Request failed, retrying"
            );
        }
    }

    async fn attempt(&self, command: &Command, message: &Message, priority: Priority) -> Result<Attempt> {
        let bus = self.connection.bus();
        let mut wire = bus.subscribe_owned(wire_pattern(command, message))?;
        let mut reply = match command.address() {
            Some(address) if command.expects_reply() => {
                let mut pattern = TopicPattern::device(address);
                if let Some(name) = command.reply_name() {
                    pattern.name = NamePattern::Exactly(Cow::Borrowed(name));
                }
                Some(bus.subscribe(pattern)?)
            }
            _ => None,
        };

        let mut state = RequestState::Sent;
        self.connection.send(message, priority)?;
        transition(&mut state, RequestState::AwaitingWireAck);

        let clock = self.connection.clock().clone();
        let mut deadline = clock.sleep(self.config.wire_ack_timeout);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    self.connection.metrics().timeout();
                    let attempt = match state {
                        RequestState::AwaitingWireAck => {
                            warn!("No modem echo before deadline");
                            Attempt::retry(Response::new(ResponseStatus::Unsent, None))
                        }
                        _ => {
                            warn!("No device reply before deadline");
                            Attempt::retry(Response::new(ResponseStatus::Failure, None))
                        }
                    };
                    transition(&mut state, RequestState::Done);
                    return Ok(attempt);
                }
                Some(event) = wire.recv() => {
                    if state != RequestState::AwaitingWireAck
                        || !matches!(event.topic.kind, EventKind::Ack | EventKind::Nak)
                        || !event.message.echoes(message)
                    {
                        continue;
                    }
                    if event.message.is_nak() {
                        debug!("Modem refused frame");
                        transition(&mut state, RequestState::Done);
                        let response = Response::new(ResponseStatus::Failure, Some(event.message));
                        return Ok(if command.retry_on_nak() {
                            Attempt::retry(response)
                        } else {
                            Attempt::done(response)
                        });
                    }
                    if reply.is_none() {
                        transition(&mut state, RequestState::Done);
                        return Ok(Attempt::done(Response::new(
                            ResponseStatus::Success,
                            Some(event.message),
                        )));
                    }
                    transition(&mut state, RequestState::AwaitingReply);
                    deadline = clock.sleep(self.config.reply_timeout);
                }
                Some(event) = next_reply(&mut reply) => {
                    if let Some(attempt) = classify_reply(event) {
                        transition(&mut state, RequestState::Done);
                        return Ok(attempt);
                    }
                }
            }
        }
    }
}

fn transition(state: &mut RequestState, next: RequestState) {
    trace!(from = ?*state, to = ?next, "Request state");
    *state = next;
}

/// Echo topics for the outbound frame, any event kind.
fn wire_pattern(command: &Command, message: &Message) -> TopicPattern {
    let topics = CorrelationTable::global().topics(message);
    let mut pattern = match command.address() {
        Some(address) => TopicPattern::device(address),
        None => TopicPattern::modem(),
    };
    if let Some(topic) = topics.first() {
        pattern.name = NamePattern::Exactly(Cow::Borrowed(topic.name));
        pattern.group = Segment::Exactly(topic.group);
    }
    pattern
}

async fn next_reply(reply: &mut Option<Subscription>) -> Option<Event> {
    match reply {
        Some(subscription) => subscription.recv().await,
        None => futures::future::pending().await,
    }
}

fn classify_reply(event: Event) -> Option<Attempt> {
    let EventKind::Insteon(kind) = event.topic.kind else {
        return None;
    };
    let reason = event.message.insteon()?.cmd2;
    match kind {
        MessageType::DirectAck => Some(Attempt::done(Response::new(
            ResponseStatus::Success,
            Some(event.message),
        ))),
        MessageType::DirectNak => {
            let response = |status| Response::new(status, Some(event.message.clone()));
            Some(match reason {
                NAK_NO_LOAD => {
                    debug!(reason, "Device NAK: no load");
                    Attempt::done(response(ResponseStatus::Unclear))
                }
                NAK_CHECKSUM => {
                    warn!(reason, "Device NAK: checksum");
                    Attempt::retry(response(ResponseStatus::Failure))
                }
                _ => {
                    warn!(reason, "Device NAK");
                    Attempt::done(response(ResponseStatus::Failure))
                }
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::Address;
    use crate::core::flags::MessageFlags;
    use crate::core::message::{Body, InsteonMessage};
    use crate::protocol::topic::Topic;

    fn reply(kind: MessageType, cmd2: u8) -> Event {
        let message = Message::new(Body::Received(InsteonMessage {
            address: Address::new([1, 2, 3]),
            target: Some(Address::new([4, 5, 6])),
            flags: MessageFlags::new(kind, false),
            cmd1: 0x11,
            cmd2,
            user_data: None,
        }));
        Event {
            topic: Topic {
                address: Some(Address::new([1, 2, 3])),
                group: None,
                name: "on",
                kind: EventKind::Insteon(kind),
            },
            message: Arc::new(message),
        }
    }

    #[test]
    fn test_nak_reasons() {
        let unclear = classify_reply(reply(MessageType::DirectNak, NAK_NO_LOAD)).unwrap();
        assert_eq!(unclear.response.status, ResponseStatus::Unclear);
        assert!(!unclear.retry);

        let checksum = classify_reply(reply(MessageType::DirectNak, NAK_CHECKSUM)).unwrap();
        assert_eq!(checksum.response.status, ResponseStatus::Failure);
        assert!(checksum.retry);

        for reason in [NAK_NOT_LINKED, NAK_PRE_NAK] {
            let failure = classify_reply(reply(MessageType::DirectNak, reason)).unwrap();
            assert_eq!(failure.response.status, ResponseStatus::Failure);
            assert!(!failure.retry);
        }
    }

    #[test]
    fn test_ack_succeeds_and_broadcasts_are_ignored() {
        let ack = classify_reply(reply(MessageType::DirectAck, 0xFF)).unwrap();
        assert!(ack.response.is_success());
        assert!(classify_reply(reply(MessageType::Broadcast, 0)).is_none());
    }
}
