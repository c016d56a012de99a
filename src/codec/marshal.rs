//! Per-command marshalling: one generic `encode`/`decode` pair per
//! command type, parameterized on the negotiated [`OpenWireVersion`]
//! rather than ten generated per-version structs (see DESIGN.md).
//!
//! Field helpers push a presence/compaction bit into the boolean stream
//! in tight mode, or write an inline presence byte in loose mode.

use crate::codec::boolean_stream::{BooleanStreamReader, BooleanStreamWriter};
use crate::codec::wire::{
    ascii_to_modified_utf8, modified_utf8_to_ascii, read_nullable_string, read_required_string,
    write_nullable_string,
};
use crate::command::id::{ConnectionId, ConsumerId, MessageId, ProducerId, SessionId};
use crate::command::transaction::TransactionKind;
use crate::command::*;
use crate::error::{CoreError, CoreResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

pub type OpenWireVersion = u8;

// ---- tight-mode string helper: one presence bit, one is-long bit ----

fn write_tight_string(
    bs: &mut BooleanStreamWriter,
    payload: &mut Vec<u8>,
    s: Option<&str>,
) -> CoreResult<()> {
    match s {
        None => bs.write_bool(false),
        Some(s) => {
            bs.write_bool(true);
            let is_long = s.len() > u16::MAX as usize;
            bs.write_bool(is_long);
            if is_long {
                payload.write_u32::<BigEndian>(s.len() as u32)?;
            } else {
                payload.write_u16::<BigEndian>(s.len() as u16)?;
            }
            payload.write_all(s.as_bytes())?;
        }
    }
    Ok(())
}

fn read_tight_string(
    bs: &mut BooleanStreamReader,
    r: &mut dyn Read,
) -> CoreResult<Option<String>> {
    if !bs.read_bool()? {
        return Ok(None);
    }
    let is_long = bs.read_bool()?;
    let len = if is_long {
        r.read_u32::<BigEndian>()? as usize
    } else {
        r.read_u16::<BigEndian>()? as usize
    };
    let mut buf = vec![0_u8; len];
    r.read_exact(&mut buf)?;
    Ok(Some(
        String::from_utf8(buf).map_err(|_| CoreError::protocol("invalid UTF-8 in string field"))?,
    ))
}

fn write_tight_required_string(
    bs: &mut BooleanStreamWriter,
    payload: &mut Vec<u8>,
    s: &str,
) -> CoreResult<()> {
    write_tight_string(bs, payload, Some(s))
}

fn read_tight_required_string(bs: &mut BooleanStreamReader, r: &mut dyn Read) -> CoreResult<String> {
    read_tight_string(bs, r)?.ok_or_else(|| CoreError::protocol("expected non-null string"))
}

// ---- tight-mode integer compaction: one non-default bit ----

fn write_tight_u64(bs: &mut BooleanStreamWriter, payload: &mut Vec<u8>, v: u64) -> CoreResult<()> {
    let nonzero = v != 0;
    bs.write_bool(nonzero);
    if nonzero {
        payload.write_u64::<BigEndian>(v)?;
    }
    Ok(())
}

fn read_tight_u64(bs: &mut BooleanStreamReader, r: &mut dyn Read) -> CoreResult<u64> {
    if bs.read_bool()? {
        Ok(r.read_u64::<BigEndian>()?)
    } else {
        Ok(0)
    }
}

fn write_tight_u32(bs: &mut BooleanStreamWriter, payload: &mut Vec<u8>, v: u32) -> CoreResult<()> {
    let nonzero = v != 0;
    bs.write_bool(nonzero);
    if nonzero {
        payload.write_u32::<BigEndian>(v)?;
    }
    Ok(())
}

fn read_tight_u32(bs: &mut BooleanStreamReader, r: &mut dyn Read) -> CoreResult<u32> {
    if bs.read_bool()? {
        Ok(r.read_u32::<BigEndian>()?)
    } else {
        Ok(0)
    }
}

fn write_tight_u8(bs: &mut BooleanStreamWriter, payload: &mut Vec<u8>, v: u8) -> CoreResult<()> {
    let nonzero = v != 0;
    bs.write_bool(nonzero);
    if nonzero {
        payload.write_u8(v)?;
    }
    Ok(())
}

fn read_tight_u8(bs: &mut BooleanStreamReader, r: &mut dyn Read) -> CoreResult<u8> {
    if bs.read_bool()? {
        Ok(r.read_u8()?)
    } else {
        Ok(0)
    }
}

fn write_tight_i64(bs: &mut BooleanStreamWriter, payload: &mut Vec<u8>, v: i64) -> CoreResult<()> {
    write_tight_u64(bs, payload, v as u64)
}
fn read_tight_i64(bs: &mut BooleanStreamReader, r: &mut dyn Read) -> CoreResult<i64> {
    Ok(read_tight_u64(bs, r)? as i64)
}

// ---- identifiers, always modeled as required strings + integers ----

fn write_connection_id(
    bs: &mut BooleanStreamWriter,
    payload: &mut Vec<u8>,
    id: &ConnectionId,
) -> CoreResult<()> {
    write_tight_required_string(bs, payload, &id.0)
}
fn read_connection_id(bs: &mut BooleanStreamReader, r: &mut dyn Read) -> CoreResult<ConnectionId> {
    Ok(ConnectionId(read_tight_required_string(bs, r)?))
}

fn write_session_id(
    bs: &mut BooleanStreamWriter,
    payload: &mut Vec<u8>,
    id: &SessionId,
) -> CoreResult<()> {
    write_connection_id(bs, payload, &id.connection_id)?;
    write_tight_u64(bs, payload, id.value)
}
fn read_session_id(bs: &mut BooleanStreamReader, r: &mut dyn Read) -> CoreResult<SessionId> {
    Ok(SessionId {
        connection_id: read_connection_id(bs, r)?,
        value: read_tight_u64(bs, r)?,
    })
}

fn write_producer_id(
    bs: &mut BooleanStreamWriter,
    payload: &mut Vec<u8>,
    id: &ProducerId,
) -> CoreResult<()> {
    write_connection_id(bs, payload, &id.connection_id)?;
    write_tight_u64(bs, payload, id.session_value)?;
    write_tight_u64(bs, payload, id.value)
}
fn read_producer_id(bs: &mut BooleanStreamReader, r: &mut dyn Read) -> CoreResult<ProducerId> {
    Ok(ProducerId {
        connection_id: read_connection_id(bs, r)?,
        session_value: read_tight_u64(bs, r)?,
        value: read_tight_u64(bs, r)?,
    })
}

fn write_consumer_id(
    bs: &mut BooleanStreamWriter,
    payload: &mut Vec<u8>,
    id: &ConsumerId,
) -> CoreResult<()> {
    write_connection_id(bs, payload, &id.connection_id)?;
    write_tight_u64(bs, payload, id.session_value)?;
    write_tight_u64(bs, payload, id.value)
}
fn read_consumer_id(bs: &mut BooleanStreamReader, r: &mut dyn Read) -> CoreResult<ConsumerId> {
    Ok(ConsumerId {
        connection_id: read_connection_id(bs, r)?,
        session_value: read_tight_u64(bs, r)?,
        value: read_tight_u64(bs, r)?,
    })
}

fn write_message_id(
    bs: &mut BooleanStreamWriter,
    payload: &mut Vec<u8>,
    id: &MessageId,
) -> CoreResult<()> {
    write_producer_id(bs, payload, &id.producer_id)?;
    write_tight_u64(bs, payload, id.producer_sequence)
}
fn read_message_id(bs: &mut BooleanStreamReader, r: &mut dyn Read) -> CoreResult<MessageId> {
    Ok(MessageId {
        producer_id: read_producer_id(bs, r)?,
        producer_sequence: read_tight_u64(bs, r)?,
    })
}

// =====================================================================
// Tight mode
// =====================================================================

pub fn encode_tight(
    body: &CommandBody,
    bs: &mut BooleanStreamWriter,
    payload: &mut Vec<u8>,
    _version: OpenWireVersion,
) -> CoreResult<()> {
    match body {
        CommandBody::WireFormatInfo(w) => {
            write_tight_u8(bs, payload, w.version)?;
            bs.write_bool(w.stack_trace_enabled);
            bs.write_bool(w.cache_enabled);
            bs.write_bool(w.tcp_no_delay_enabled);
            bs.write_bool(w.tight_encoding_enabled);
            bs.write_bool(w.size_prefix_disabled);
            write_tight_u64(bs, payload, w.max_inactivity_duration_ms)?;
            write_tight_u64(bs, payload, w.max_inactivity_duration_initial_delay_ms)?;
            write_tight_u64(bs, payload, w.max_frame_size)
        }
        CommandBody::BrokerInfo(b) => {
            write_tight_required_string(bs, payload, &b.broker_id)?;
            write_tight_required_string(bs, payload, &b.broker_url)
        }
        CommandBody::ConnectionInfo(c) => {
            write_connection_id(bs, payload, &c.connection_id)?;
            write_tight_string(bs, payload, c.client_id.as_deref())
        }
        CommandBody::SessionInfo(s) => write_session_id(bs, payload, &s.session_id),
        CommandBody::ProducerInfo(p) => {
            write_producer_id(bs, payload, &p.producer_id)?;
            write_tight_string(bs, payload, p.destination.as_deref())
        }
        CommandBody::ConsumerInfo(c) => {
            write_consumer_id(bs, payload, &c.consumer_id)?;
            write_tight_string(bs, payload, c.destination.as_deref())?;
            write_tight_u32(bs, payload, c.prefetch_size)
        }
        CommandBody::RemoveInfo(ri) => {
            let tag: u8 = match &ri.target {
                RemovableId::Connection(_) => 0,
                RemovableId::Session(_) => 1,
                RemovableId::Producer(_) => 2,
                RemovableId::Consumer(_) => 3,
            };
            payload.write_u8(tag)?;
            match &ri.target {
                RemovableId::Connection(id) => write_connection_id(bs, payload, id),
                RemovableId::Session(id) => write_session_id(bs, payload, id),
                RemovableId::Producer(id) => write_producer_id(bs, payload, id),
                RemovableId::Consumer(id) => write_consumer_id(bs, payload, id),
            }
        }
        CommandBody::Message(m) => {
            write_message_id(bs, payload, &m.message_id)?;
            write_tight_required_string(bs, payload, &m.destination)?;
            bs.write_bool(m.persistent);
            bs.write_bool(m.redelivered);
            write_tight_u8(bs, payload, m.priority)?;
            write_tight_u32(bs, payload, m.body.len() as u32)?;
            payload.write_all(&m.body)?;
            Ok(())
        }
        CommandBody::MessageAck(a) => {
            write_consumer_id(bs, payload, &a.consumer_id)?;
            bs.write_bool(a.first_message_id.is_some());
            if let Some(id) = &a.first_message_id {
                write_message_id(bs, payload, id)?;
            }
            write_message_id(bs, payload, &a.last_message_id)?;
            payload.write_u8(ack_type_to_byte(a.ack_type))?;
            Ok(())
        }
        CommandBody::MessagePull(p) => {
            write_consumer_id(bs, payload, &p.consumer_id)?;
            write_tight_i64(bs, payload, p.timeout_ms)
        }
        CommandBody::MessageDispatch(d) => {
            write_consumer_id(bs, payload, &d.consumer_id)?;
            bs.write_bool(d.message.is_some());
            if let Some(m) = &d.message {
                encode_tight(&CommandBody::Message(m.clone()), bs, payload, _version)?;
            }
            write_tight_u32(bs, payload, d.redelivery_counter)
        }
        CommandBody::MessageDispatchNotification(n) => {
            write_consumer_id(bs, payload, &n.consumer_id)?;
            write_message_id(bs, payload, &n.message_id)
        }
        CommandBody::TransactionInfo(t) => {
            write_tight_required_string(bs, payload, &t.transaction_id)?;
            payload.write_u8(t.kind.to_byte())?;
            Ok(())
        }
        CommandBody::KeepAliveInfo(_) | CommandBody::ShutdownInfo(_) | CommandBody::FlushCommand(_) => {
            Ok(())
        }
        CommandBody::Response(resp) => write_tight_u32(bs, payload, resp.correlation_id),
        CommandBody::ExceptionResponse(e) => {
            write_tight_u32(bs, payload, e.correlation_id)?;
            write_tight_required_string(bs, payload, &e.exception_class)?;
            write_tight_required_string(bs, payload, &e.message)
        }
        CommandBody::ConnectionControl(c) => {
            bs.write_bool(c.close);
            bs.write_bool(c.fault_tolerant);
            write_tight_string(bs, payload, c.reconnect_to.as_deref())
        }
        CommandBody::ConsumerControl(c) => {
            write_consumer_id(bs, payload, &c.consumer_id)?;
            write_tight_u32(bs, payload, c.prefetch)?;
            bs.write_bool(c.close);
            Ok(())
        }
        CommandBody::ProducerAck(p) => {
            write_producer_id(bs, payload, &p.producer_id)?;
            write_tight_u32(bs, payload, p.size)
        }
        CommandBody::ControlCommand(c) => write_tight_required_string(bs, payload, &c.command),
        CommandBody::ReplayCommand(c) => write_tight_u32(bs, payload, c.first_nak),
    }
}

pub fn decode_tight(
    ctype: CommandType,
    bs: &mut BooleanStreamReader,
    r: &mut dyn Read,
    version: OpenWireVersion,
) -> CoreResult<CommandBody> {
    Ok(match ctype {
        CommandType::WireFormatInfo => CommandBody::WireFormatInfo(WireFormatInfo {
            version: read_tight_u8(bs, r)?,
            stack_trace_enabled: bs.read_bool()?,
            cache_enabled: bs.read_bool()?,
            tcp_no_delay_enabled: bs.read_bool()?,
            tight_encoding_enabled: bs.read_bool()?,
            size_prefix_disabled: bs.read_bool()?,
            max_inactivity_duration_ms: read_tight_u64(bs, r)?,
            max_inactivity_duration_initial_delay_ms: read_tight_u64(bs, r)?,
            max_frame_size: read_tight_u64(bs, r)?,
        }),
        CommandType::BrokerInfo => CommandBody::BrokerInfo(BrokerInfo {
            broker_id: read_tight_required_string(bs, r)?,
            broker_url: read_tight_required_string(bs, r)?,
        }),
        CommandType::ConnectionInfo => CommandBody::ConnectionInfo(ConnectionInfo {
            connection_id: read_connection_id(bs, r)?,
            client_id: read_tight_string(bs, r)?,
        }),
        CommandType::SessionInfo => CommandBody::SessionInfo(SessionInfo {
            session_id: read_session_id(bs, r)?,
        }),
        CommandType::ProducerInfo => CommandBody::ProducerInfo(ProducerInfo {
            producer_id: read_producer_id(bs, r)?,
            destination: read_tight_string(bs, r)?,
        }),
        CommandType::ConsumerInfo => CommandBody::ConsumerInfo(ConsumerInfo {
            consumer_id: read_consumer_id(bs, r)?,
            destination: read_tight_string(bs, r)?,
            prefetch_size: read_tight_u32(bs, r)?,
        }),
        CommandType::RemoveInfo => {
            let tag = r.read_u8()?;
            let target = match tag {
                0 => RemovableId::Connection(read_connection_id(bs, r)?),
                1 => RemovableId::Session(read_session_id(bs, r)?),
                2 => RemovableId::Producer(read_producer_id(bs, r)?),
                3 => RemovableId::Consumer(read_consumer_id(bs, r)?),
                other => {
                    return Err(CoreError::protocol(format!(
                        "unknown RemoveInfo target tag {other}"
                    )))
                }
            };
            CommandBody::RemoveInfo(RemoveInfo { target })
        }
        CommandType::Message => CommandBody::Message(decode_message_tight(bs, r)?),
        CommandType::MessageAck => {
            let consumer_id = read_consumer_id(bs, r)?;
            let has_first = bs.read_bool()?;
            let first_message_id = if has_first {
                Some(read_message_id(bs, r)?)
            } else {
                None
            };
            let last_message_id = read_message_id(bs, r)?;
            let ack_type = ack_type_from_byte(r.read_u8()?)?;
            CommandBody::MessageAck(MessageAck {
                consumer_id,
                first_message_id,
                last_message_id,
                ack_type,
            })
        }
        CommandType::MessagePull => CommandBody::MessagePull(MessagePull {
            consumer_id: read_consumer_id(bs, r)?,
            timeout_ms: read_tight_i64(bs, r)?,
        }),
        CommandType::MessageDispatch => {
            let consumer_id = read_consumer_id(bs, r)?;
            let has_message = bs.read_bool()?;
            let message = if has_message {
                Some(decode_message_tight(bs, r)?)
            } else {
                None
            };
            let redelivery_counter = read_tight_u32(bs, r)?;
            CommandBody::MessageDispatch(MessageDispatch {
                consumer_id,
                message,
                redelivery_counter,
            })
        }
        CommandType::MessageDispatchNotification => {
            CommandBody::MessageDispatchNotification(MessageDispatchNotification {
                consumer_id: read_consumer_id(bs, r)?,
                message_id: read_message_id(bs, r)?,
            })
        }
        CommandType::TransactionInfo => {
            let transaction_id = read_tight_required_string(bs, r)?;
            let kind = TransactionKind::from_byte(r.read_u8()?)
                .ok_or_else(|| CoreError::protocol("unknown TransactionInfo sub-type"))?;
            CommandBody::TransactionInfo(TransactionInfo {
                transaction_id,
                kind,
            })
        }
        CommandType::KeepAliveInfo => CommandBody::KeepAliveInfo(KeepAliveInfo),
        CommandType::ShutdownInfo => CommandBody::ShutdownInfo(ShutdownInfo),
        CommandType::FlushCommand => CommandBody::FlushCommand(FlushCommand),
        CommandType::Response => CommandBody::Response(Response {
            correlation_id: read_tight_u32(bs, r)?,
        }),
        CommandType::ExceptionResponse => CommandBody::ExceptionResponse(ExceptionResponse {
            correlation_id: read_tight_u32(bs, r)?,
            exception_class: read_tight_required_string(bs, r)?,
            message: read_tight_required_string(bs, r)?,
        }),
        CommandType::ConnectionControl => CommandBody::ConnectionControl(ConnectionControl {
            close: bs.read_bool()?,
            fault_tolerant: bs.read_bool()?,
            reconnect_to: read_tight_string(bs, r)?,
        }),
        CommandType::ConsumerControl => CommandBody::ConsumerControl(ConsumerControl {
            consumer_id: read_consumer_id(bs, r)?,
            prefetch: read_tight_u32(bs, r)?,
            close: bs.read_bool()?,
        }),
        CommandType::ProducerAck => CommandBody::ProducerAck(ProducerAck {
            producer_id: read_producer_id(bs, r)?,
            size: read_tight_u32(bs, r)?,
        }),
        CommandType::ControlCommand => CommandBody::ControlCommand(ControlCommand {
            command: read_tight_required_string(bs, r)?,
        }),
        CommandType::ReplayCommand => CommandBody::ReplayCommand(ReplayCommand {
            first_nak: read_tight_u32(bs, r)?,
        }),
    })
    .map(|body| {
        let _ = version; // version currently only gates WireFormatInfo negotiation, not field layout
        body
    })
}

fn decode_message_tight(bs: &mut BooleanStreamReader, r: &mut dyn Read) -> CoreResult<Message> {
    let message_id = read_message_id(bs, r)?;
    let destination = read_tight_required_string(bs, r)?;
    let persistent = bs.read_bool()?;
    let redelivered = bs.read_bool()?;
    let priority = read_tight_u8(bs, r)?;
    let len = read_tight_u32(bs, r)? as usize;
    let mut body = vec![0_u8; len];
    r.read_exact(&mut body)?;
    Ok(Message {
        message_id,
        destination,
        body,
        priority,
        persistent,
        redelivered,
    })
}

fn ack_type_to_byte(t: AckType) -> u8 {
    match t {
        AckType::Delivered => 0,
        AckType::Poison => 1,
        AckType::Redelivered => 2,
        AckType::Consumed => 3,
        AckType::Expired => 4,
    }
}

fn ack_type_from_byte(b: u8) -> CoreResult<AckType> {
    Ok(match b {
        0 => AckType::Delivered,
        1 => AckType::Poison,
        2 => AckType::Redelivered,
        3 => AckType::Consumed,
        4 => AckType::Expired,
        other => return Err(CoreError::protocol(format!("unknown ack type {other}"))),
    })
}

// =====================================================================
// Loose mode — each nullable field preceded by an inline presence flag;
// no boolean-stream pre-computation.
// =====================================================================

fn write_loose_required_string(w: &mut dyn Write, s: &str) -> CoreResult<()> {
    write_nullable_string(w, Some(s))
}
fn read_loose_required_string(r: &mut dyn Read) -> CoreResult<String> {
    read_required_string(r)
}

pub fn encode_loose(body: &CommandBody, w: &mut dyn Write, _version: OpenWireVersion) -> CoreResult<()> {
    match body {
        CommandBody::WireFormatInfo(wfi) => {
            w.write_u8(wfi.version)?;
            w.write_u8(u8::from(wfi.stack_trace_enabled))?;
            w.write_u8(u8::from(wfi.cache_enabled))?;
            w.write_u8(u8::from(wfi.tcp_no_delay_enabled))?;
            w.write_u8(u8::from(wfi.tight_encoding_enabled))?;
            w.write_u8(u8::from(wfi.size_prefix_disabled))?;
            w.write_u64::<BigEndian>(wfi.max_inactivity_duration_ms)?;
            w.write_u64::<BigEndian>(wfi.max_inactivity_duration_initial_delay_ms)?;
            w.write_u64::<BigEndian>(wfi.max_frame_size)?;
            Ok(())
        }
        CommandBody::BrokerInfo(b) => {
            write_loose_required_string(w, &b.broker_id)?;
            write_loose_required_string(w, &b.broker_url)
        }
        CommandBody::ConnectionInfo(c) => {
            write_loose_required_string(w, &c.connection_id.0)?;
            write_nullable_string(w, c.client_id.as_deref())
        }
        CommandBody::SessionInfo(s) => write_loose_session_id(w, &s.session_id),
        CommandBody::ProducerInfo(p) => {
            write_loose_producer_id(w, &p.producer_id)?;
            write_nullable_string(w, p.destination.as_deref())
        }
        CommandBody::ConsumerInfo(c) => {
            write_loose_consumer_id(w, &c.consumer_id)?;
            write_nullable_string(w, c.destination.as_deref())?;
            w.write_u32::<BigEndian>(c.prefetch_size)?;
            Ok(())
        }
        CommandBody::RemoveInfo(ri) => {
            let tag: u8 = match &ri.target {
                RemovableId::Connection(_) => 0,
                RemovableId::Session(_) => 1,
                RemovableId::Producer(_) => 2,
                RemovableId::Consumer(_) => 3,
            };
            w.write_u8(tag)?;
            match &ri.target {
                RemovableId::Connection(id) => write_loose_required_string(w, &id.0),
                RemovableId::Session(id) => write_loose_session_id(w, id),
                RemovableId::Producer(id) => write_loose_producer_id(w, id),
                RemovableId::Consumer(id) => write_loose_consumer_id(w, id),
            }
        }
        CommandBody::Message(m) => write_loose_message(w, m),
        CommandBody::MessageAck(a) => {
            write_loose_consumer_id(w, &a.consumer_id)?;
            w.write_u8(u8::from(a.first_message_id.is_some()))?;
            if let Some(id) = &a.first_message_id {
                write_loose_message_id(w, id)?;
            }
            write_loose_message_id(w, &a.last_message_id)?;
            w.write_u8(ack_type_to_byte(a.ack_type))?;
            Ok(())
        }
        CommandBody::MessagePull(p) => {
            write_loose_consumer_id(w, &p.consumer_id)?;
            w.write_i64::<BigEndian>(p.timeout_ms)?;
            Ok(())
        }
        CommandBody::MessageDispatch(d) => {
            write_loose_consumer_id(w, &d.consumer_id)?;
            w.write_u8(u8::from(d.message.is_some()))?;
            if let Some(m) = &d.message {
                write_loose_message(w, m)?;
            }
            w.write_u32::<BigEndian>(d.redelivery_counter)?;
            Ok(())
        }
        CommandBody::MessageDispatchNotification(n) => {
            write_loose_consumer_id(w, &n.consumer_id)?;
            write_loose_message_id(w, &n.message_id)
        }
        CommandBody::TransactionInfo(t) => {
            write_loose_required_string(w, &t.transaction_id)?;
            w.write_u8(t.kind.to_byte())?;
            Ok(())
        }
        CommandBody::KeepAliveInfo(_) | CommandBody::ShutdownInfo(_) | CommandBody::FlushCommand(_) => {
            Ok(())
        }
        CommandBody::Response(resp) => {
            w.write_u32::<BigEndian>(resp.correlation_id)?;
            Ok(())
        }
        CommandBody::ExceptionResponse(e) => {
            w.write_u32::<BigEndian>(e.correlation_id)?;
            write_loose_required_string(w, &e.exception_class)?;
            write_loose_required_string(w, &e.message)
        }
        CommandBody::ConnectionControl(c) => {
            w.write_u8(u8::from(c.close))?;
            w.write_u8(u8::from(c.fault_tolerant))?;
            write_nullable_string(w, c.reconnect_to.as_deref())
        }
        CommandBody::ConsumerControl(c) => {
            write_loose_consumer_id(w, &c.consumer_id)?;
            w.write_u32::<BigEndian>(c.prefetch)?;
            w.write_u8(u8::from(c.close))?;
            Ok(())
        }
        CommandBody::ProducerAck(p) => {
            write_loose_producer_id(w, &p.producer_id)?;
            w.write_u32::<BigEndian>(p.size)?;
            Ok(())
        }
        CommandBody::ControlCommand(c) => write_loose_required_string(w, &c.command),
        CommandBody::ReplayCommand(c) => {
            w.write_u32::<BigEndian>(c.first_nak)?;
            Ok(())
        }
    }
}

fn write_loose_session_id(w: &mut dyn Write, id: &SessionId) -> CoreResult<()> {
    write_loose_required_string(w, &id.connection_id.0)?;
    w.write_u64::<BigEndian>(id.value)?;
    Ok(())
}
fn read_loose_session_id(r: &mut dyn Read) -> CoreResult<SessionId> {
    Ok(SessionId {
        connection_id: ConnectionId(read_loose_required_string(r)?),
        value: r.read_u64::<BigEndian>()?,
    })
}
fn write_loose_producer_id(w: &mut dyn Write, id: &ProducerId) -> CoreResult<()> {
    write_loose_required_string(w, &id.connection_id.0)?;
    w.write_u64::<BigEndian>(id.session_value)?;
    w.write_u64::<BigEndian>(id.value)?;
    Ok(())
}
fn read_loose_producer_id(r: &mut dyn Read) -> CoreResult<ProducerId> {
    Ok(ProducerId {
        connection_id: ConnectionId(read_loose_required_string(r)?),
        session_value: r.read_u64::<BigEndian>()?,
        value: r.read_u64::<BigEndian>()?,
    })
}
fn write_loose_consumer_id(w: &mut dyn Write, id: &ConsumerId) -> CoreResult<()> {
    write_loose_required_string(w, &id.connection_id.0)?;
    w.write_u64::<BigEndian>(id.session_value)?;
    w.write_u64::<BigEndian>(id.value)?;
    Ok(())
}
fn read_loose_consumer_id(r: &mut dyn Read) -> CoreResult<ConsumerId> {
    Ok(ConsumerId {
        connection_id: ConnectionId(read_loose_required_string(r)?),
        session_value: r.read_u64::<BigEndian>()?,
        value: r.read_u64::<BigEndian>()?,
    })
}
fn write_loose_message_id(w: &mut dyn Write, id: &MessageId) -> CoreResult<()> {
    write_loose_producer_id(w, &id.producer_id)?;
    w.write_u64::<BigEndian>(id.producer_sequence)?;
    Ok(())
}
fn read_loose_message_id(r: &mut dyn Read) -> CoreResult<MessageId> {
    Ok(MessageId {
        producer_id: read_loose_producer_id(r)?,
        producer_sequence: r.read_u64::<BigEndian>()?,
    })
}
fn write_loose_message(w: &mut dyn Write, m: &Message) -> CoreResult<()> {
    write_loose_message_id(w, &m.message_id)?;
    write_loose_required_string(w, &m.destination)?;
    w.write_u8(u8::from(m.persistent))?;
    w.write_u8(u8::from(m.redelivered))?;
    w.write_u8(m.priority)?;
    w.write_u32::<BigEndian>(m.body.len() as u32)?;
    w.write_all(&m.body)?;
    Ok(())
}
fn read_loose_message(r: &mut dyn Read) -> CoreResult<Message> {
    let message_id = read_loose_message_id(r)?;
    let destination = read_loose_required_string(r)?;
    let persistent = r.read_u8()? != 0;
    let redelivered = r.read_u8()? != 0;
    let priority = r.read_u8()?;
    let len = r.read_u32::<BigEndian>()? as usize;
    let mut body = vec![0_u8; len];
    r.read_exact(&mut body)?;
    Ok(Message {
        message_id,
        destination,
        body,
        priority,
        persistent,
        redelivered,
    })
}

pub fn decode_loose(
    ctype: CommandType,
    r: &mut dyn Read,
    _version: OpenWireVersion,
) -> CoreResult<CommandBody> {
    Ok(match ctype {
        CommandType::WireFormatInfo => CommandBody::WireFormatInfo(WireFormatInfo {
            version: r.read_u8()?,
            stack_trace_enabled: r.read_u8()? != 0,
            cache_enabled: r.read_u8()? != 0,
            tcp_no_delay_enabled: r.read_u8()? != 0,
            tight_encoding_enabled: r.read_u8()? != 0,
            size_prefix_disabled: r.read_u8()? != 0,
            max_inactivity_duration_ms: r.read_u64::<BigEndian>()?,
            max_inactivity_duration_initial_delay_ms: r.read_u64::<BigEndian>()?,
            max_frame_size: r.read_u64::<BigEndian>()?,
        }),
        CommandType::BrokerInfo => CommandBody::BrokerInfo(BrokerInfo {
            broker_id: read_loose_required_string(r)?,
            broker_url: read_loose_required_string(r)?,
        }),
        CommandType::ConnectionInfo => CommandBody::ConnectionInfo(ConnectionInfo {
            connection_id: ConnectionId(read_loose_required_string(r)?),
            client_id: read_nullable_string(r)?,
        }),
        CommandType::SessionInfo => CommandBody::SessionInfo(SessionInfo {
            session_id: read_loose_session_id(r)?,
        }),
        CommandType::ProducerInfo => CommandBody::ProducerInfo(ProducerInfo {
            producer_id: read_loose_producer_id(r)?,
            destination: read_nullable_string(r)?,
        }),
        CommandType::ConsumerInfo => CommandBody::ConsumerInfo(ConsumerInfo {
            consumer_id: read_loose_consumer_id(r)?,
            destination: read_nullable_string(r)?,
            prefetch_size: r.read_u32::<BigEndian>()?,
        }),
        CommandType::RemoveInfo => {
            let tag = r.read_u8()?;
            let target = match tag {
                0 => RemovableId::Connection(ConnectionId(read_loose_required_string(r)?)),
                1 => RemovableId::Session(read_loose_session_id(r)?),
                2 => RemovableId::Producer(read_loose_producer_id(r)?),
                3 => RemovableId::Consumer(read_loose_consumer_id(r)?),
                other => {
                    return Err(CoreError::protocol(format!(
                        "unknown RemoveInfo target tag {other}"
                    )))
                }
            };
            CommandBody::RemoveInfo(RemoveInfo { target })
        }
        CommandType::Message => CommandBody::Message(read_loose_message(r)?),
        CommandType::MessageAck => {
            let consumer_id = read_loose_consumer_id(r)?;
            let has_first = r.read_u8()? != 0;
            let first_message_id = if has_first {
                Some(read_loose_message_id(r)?)
            } else {
                None
            };
            let last_message_id = read_loose_message_id(r)?;
            let ack_type = ack_type_from_byte(r.read_u8()?)?;
            CommandBody::MessageAck(MessageAck {
                consumer_id,
                first_message_id,
                last_message_id,
                ack_type,
            })
        }
        CommandType::MessagePull => CommandBody::MessagePull(MessagePull {
            consumer_id: read_loose_consumer_id(r)?,
            timeout_ms: r.read_i64::<BigEndian>()?,
        }),
        CommandType::MessageDispatch => {
            let consumer_id = read_loose_consumer_id(r)?;
            let has_message = r.read_u8()? != 0;
            let message = if has_message {
                Some(read_loose_message(r)?)
            } else {
                None
            };
            let redelivery_counter = r.read_u32::<BigEndian>()?;
            CommandBody::MessageDispatch(MessageDispatch {
                consumer_id,
                message,
                redelivery_counter,
            })
        }
        CommandType::MessageDispatchNotification => {
            CommandBody::MessageDispatchNotification(MessageDispatchNotification {
                consumer_id: read_loose_consumer_id(r)?,
                message_id: read_loose_message_id(r)?,
            })
        }
        CommandType::TransactionInfo => {
            let transaction_id = read_loose_required_string(r)?;
            let kind = TransactionKind::from_byte(r.read_u8()?)
                .ok_or_else(|| CoreError::protocol("unknown TransactionInfo sub-type"))?;
            CommandBody::TransactionInfo(TransactionInfo {
                transaction_id,
                kind,
            })
        }
        CommandType::KeepAliveInfo => CommandBody::KeepAliveInfo(KeepAliveInfo),
        CommandType::ShutdownInfo => CommandBody::ShutdownInfo(ShutdownInfo),
        CommandType::FlushCommand => CommandBody::FlushCommand(FlushCommand),
        CommandType::Response => CommandBody::Response(Response {
            correlation_id: r.read_u32::<BigEndian>()?,
        }),
        CommandType::ExceptionResponse => CommandBody::ExceptionResponse(ExceptionResponse {
            correlation_id: r.read_u32::<BigEndian>()?,
            exception_class: read_loose_required_string(r)?,
            message: read_loose_required_string(r)?,
        }),
        CommandType::ConnectionControl => CommandBody::ConnectionControl(ConnectionControl {
            close: r.read_u8()? != 0,
            fault_tolerant: r.read_u8()? != 0,
            reconnect_to: read_nullable_string(r)?,
        }),
        CommandType::ConsumerControl => CommandBody::ConsumerControl(ConsumerControl {
            consumer_id: read_loose_consumer_id(r)?,
            prefetch: r.read_u32::<BigEndian>()?,
            close: r.read_u8()? != 0,
        }),
        CommandType::ProducerAck => CommandBody::ProducerAck(ProducerAck {
            producer_id: read_loose_producer_id(r)?,
            size: r.read_u32::<BigEndian>()?,
        }),
        CommandType::ControlCommand => CommandBody::ControlCommand(ControlCommand {
            command: read_loose_required_string(r)?,
        }),
        CommandType::ReplayCommand => CommandBody::ReplayCommand(ReplayCommand {
            first_nak: r.read_u32::<BigEndian>()?,
        }),
    })
}

/// Exercises the ASCII/modified-UTF-8 transform on a byte payload; kept
/// here (rather than inlined at every call site) since only LOB-less
/// opaque message bodies and a handful of diagnostic strings use it.
pub fn reencode_ascii_payload(bytes: &[u8]) -> Vec<u8> {
    ascii_to_modified_utf8(bytes)
}

pub fn decode_ascii_payload(bytes: &[u8]) -> CoreResult<Vec<u8>> {
    modified_utf8_to_ascii(bytes)
}
