//! The polymorphic `Command` value: every frame the wire codec marshals
//! is one of these. The enum is intentionally closed — the command
//! dispatch registry ([`crate::transport::dispatch`]) is a visitor over
//! exactly this set, and an unknown type byte on the wire is a fatal
//! [`crate::CoreError::Protocol`], never a silently-ignored variant.

pub mod id;
pub mod transaction;
pub mod wire_format_info;

pub use id::{ConnectionId, ConsumerId, MessageId, ProducerId, SessionId};
pub use transaction::TransactionKind;
pub use wire_format_info::WireFormatInfo;

/// Every command carries a `commandId`, assigned by the response
/// correlator at send time, and a `responseRequired` flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub command_id: u32,
    pub response_required: bool,
    pub body: CommandBody,
}

impl Command {
    pub fn new(body: CommandBody) -> Self {
        Command {
            command_id: 0,
            response_required: false,
            body,
        }
    }

    /// True for `Response`/`ExceptionResponse`: frames the correlator
    /// matches against an outstanding request by `correlation_id` rather
    /// than forwarding upward.
    pub fn is_response(&self) -> bool {
        matches!(
            self.body,
            CommandBody::Response(_) | CommandBody::ExceptionResponse(_)
        )
    }

    /// The `correlationId` carried by a response frame, or `None` for
    /// every other command.
    pub fn correlation_id(&self) -> Option<u32> {
        match &self.body {
            CommandBody::Response(r) => Some(r.correlation_id),
            CommandBody::ExceptionResponse(r) => Some(r.correlation_id),
            _ => None,
        }
    }

    /// Builds a synthetic `ExceptionResponse` completing the request
    /// `command_id`, used by the correlator's prior-error latch and by
    /// failover's recovery-error completion.
    pub fn synthetic_exception(command_id: u32, exception_class: &str, message: String) -> Self {
        Command {
            command_id: 0,
            response_required: false,
            body: CommandBody::ExceptionResponse(ExceptionResponse {
                correlation_id: command_id,
                exception_class: exception_class.to_string(),
                message,
            }),
        }
    }
}

/// The type-byte dispatch table is realised as this enum's discriminants:
/// the codec looks up a type byte, decodes the matching variant, and a
/// byte with no match here is a fatal decode error (the null sentinel,
/// type byte `0`, is handled separately by the codec and is not a
/// variant of this enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum CommandType {
    WireFormatInfo = 1,
    BrokerInfo = 2,
    ConnectionInfo = 3,
    SessionInfo = 4,
    ProducerInfo = 5,
    ConsumerInfo = 6,
    RemoveInfo = 7,
    Message = 8,
    MessageAck = 9,
    MessagePull = 10,
    MessageDispatch = 11,
    MessageDispatchNotification = 12,
    TransactionInfo = 13,
    KeepAliveInfo = 14,
    ShutdownInfo = 15,
    Response = 16,
    ExceptionResponse = 17,
    ConnectionControl = 18,
    ConsumerControl = 19,
    ProducerAck = 20,
    ControlCommand = 21,
    ReplayCommand = 22,
    FlushCommand = 23,
}

impl CommandType {
    pub fn from_byte(b: u8) -> Option<Self> {
        use CommandType::*;
        Some(match b {
            1 => WireFormatInfo,
            2 => BrokerInfo,
            3 => ConnectionInfo,
            4 => SessionInfo,
            5 => ProducerInfo,
            6 => ConsumerInfo,
            7 => RemoveInfo,
            8 => Message,
            9 => MessageAck,
            10 => MessagePull,
            11 => MessageDispatch,
            12 => MessageDispatchNotification,
            13 => TransactionInfo,
            14 => KeepAliveInfo,
            15 => ShutdownInfo,
            16 => Response,
            17 => ExceptionResponse,
            18 => ConnectionControl,
            19 => ConsumerControl,
            20 => ProducerAck,
            21 => ControlCommand,
            22 => ReplayCommand,
            23 => FlushCommand,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandBody {
    WireFormatInfo(WireFormatInfo),
    BrokerInfo(BrokerInfo),
    ConnectionInfo(ConnectionInfo),
    SessionInfo(SessionInfo),
    ProducerInfo(ProducerInfo),
    ConsumerInfo(ConsumerInfo),
    RemoveInfo(RemoveInfo),
    Message(Message),
    MessageAck(MessageAck),
    MessagePull(MessagePull),
    MessageDispatch(MessageDispatch),
    MessageDispatchNotification(MessageDispatchNotification),
    TransactionInfo(TransactionInfo),
    KeepAliveInfo(KeepAliveInfo),
    ShutdownInfo(ShutdownInfo),
    Response(Response),
    ExceptionResponse(ExceptionResponse),
    ConnectionControl(ConnectionControl),
    ConsumerControl(ConsumerControl),
    ProducerAck(ProducerAck),
    ControlCommand(ControlCommand),
    ReplayCommand(ReplayCommand),
    FlushCommand(FlushCommand),
}

impl CommandBody {
    pub fn command_type(&self) -> CommandType {
        match self {
            CommandBody::WireFormatInfo(_) => CommandType::WireFormatInfo,
            CommandBody::BrokerInfo(_) => CommandType::BrokerInfo,
            CommandBody::ConnectionInfo(_) => CommandType::ConnectionInfo,
            CommandBody::SessionInfo(_) => CommandType::SessionInfo,
            CommandBody::ProducerInfo(_) => CommandType::ProducerInfo,
            CommandBody::ConsumerInfo(_) => CommandType::ConsumerInfo,
            CommandBody::RemoveInfo(_) => CommandType::RemoveInfo,
            CommandBody::Message(_) => CommandType::Message,
            CommandBody::MessageAck(_) => CommandType::MessageAck,
            CommandBody::MessagePull(_) => CommandType::MessagePull,
            CommandBody::MessageDispatch(_) => CommandType::MessageDispatch,
            CommandBody::MessageDispatchNotification(_) => {
                CommandType::MessageDispatchNotification
            }
            CommandBody::TransactionInfo(_) => CommandType::TransactionInfo,
            CommandBody::KeepAliveInfo(_) => CommandType::KeepAliveInfo,
            CommandBody::ShutdownInfo(_) => CommandType::ShutdownInfo,
            CommandBody::Response(_) => CommandType::Response,
            CommandBody::ExceptionResponse(_) => CommandType::ExceptionResponse,
            CommandBody::ConnectionControl(_) => CommandType::ConnectionControl,
            CommandBody::ConsumerControl(_) => CommandType::ConsumerControl,
            CommandBody::ProducerAck(_) => CommandType::ProducerAck,
            CommandBody::ControlCommand(_) => CommandType::ControlCommand,
            CommandBody::ReplayCommand(_) => CommandType::ReplayCommand,
            CommandBody::FlushCommand(_) => CommandType::FlushCommand,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BrokerInfo {
    pub broker_id: String,
    pub broker_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerInfo {
    pub producer_id: ProducerId,
    pub destination: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerInfo {
    pub consumer_id: ConsumerId,
    pub destination: Option<String>,
    pub prefetch_size: u32,
}

/// Dispatches on the type-tag of the removed id into {CONNECTION,
/// SESSION, PRODUCER, CONSUMER}; any other value is a fatal protocol
/// error, enforced here by the enum being closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovableId {
    Connection(ConnectionId),
    Session(SessionId),
    Producer(ProducerId),
    Consumer(ConsumerId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveInfo {
    pub target: RemovableId,
}

/// The message body itself is opaque to the core; only the framing
/// fields the transport/codec must reason about are modeled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_id: MessageId,
    pub destination: String,
    pub body: Vec<u8>,
    pub priority: u8,
    pub persistent: bool,
    pub redelivered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckType {
    Delivered,
    Poison,
    Redelivered,
    Consumed,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAck {
    pub consumer_id: ConsumerId,
    pub first_message_id: Option<MessageId>,
    pub last_message_id: MessageId,
    pub ack_type: AckType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePull {
    pub consumer_id: ConsumerId,
    pub timeout_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDispatch {
    pub consumer_id: ConsumerId,
    pub message: Option<Message>,
    pub redelivery_counter: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDispatchNotification {
    pub consumer_id: ConsumerId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub transaction_id: String,
    pub kind: TransactionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeepAliveInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownInfo;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response {
    pub correlation_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExceptionResponse {
    pub correlation_id: u32,
    pub exception_class: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionControl {
    pub close: bool,
    pub reconnect_to: Option<String>,
    pub fault_tolerant: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerControl {
    pub consumer_id: ConsumerId,
    pub prefetch: u32,
    pub close: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerAck {
    pub producer_id: ProducerId,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControlCommand {
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayCommand {
    pub first_nak: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushCommand;
