// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! MQTT 5 control packet codec.
//!
//! Covers the packets used by the hub: CONNECT/CONNACK, PUBLISH/PUBACK,
//! SUBSCRIBE/SUBACK, UNSUBSCRIBE/UNSUBACK, PINGREQ/PINGRESP and DISCONNECT.
//! QoS 2 and will messages are not supported; a CONNECT carrying a will is
//! parsed and the will is discarded.
//!
//! # Wire format
//!
//! ```text
//! +--------+-------------------+-----------------+---------+
//! | type/  | remaining length  | variable header | payload |
//! | flags  | varint, 1-4 bytes |                 |         |
//! +--------+-------------------+-----------------+---------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest packet accepted.
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Protocol level of MQTT 5.
pub const PROTOCOL_LEVEL_V5: u8 = 5;

/// Reason codes used by the hub.
pub mod reason {
    pub const SUCCESS: u8 = 0x00;
    pub const GRANTED_QOS_1: u8 = 0x01;
    pub const NO_MATCHING_SUBSCRIBERS: u8 = 0x10;
    pub const UNSPECIFIED_ERROR: u8 = 0x80;
    pub const MALFORMED_PACKET: u8 = 0x81;
    pub const PROTOCOL_ERROR: u8 = 0x82;
    pub const UNSUPPORTED_PROTOCOL_VERSION: u8 = 0x84;
    pub const BAD_USERNAME_OR_PASSWORD: u8 = 0x86;
    pub const NOT_AUTHORIZED: u8 = 0x87;
    pub const KEEP_ALIVE_TIMEOUT: u8 = 0x8D;
    pub const SESSION_TAKEN_OVER: u8 = 0x8E;
}

/// Codec errors.
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed packet: {0}")]
    Malformed(&'static str),

    #[error("unsupported packet type {0}")]
    UnsupportedType(u8),

    #[error("packet of {0} bytes exceeds the maximum size")]
    TooLarge(usize),

    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    #[error("field of {0} bytes exceeds 65535 bytes")]
    FieldTooLong(usize),

    #[error("connection closed mid-packet")]
    UnexpectedEof,
}

pub type Result<T> = std::result::Result<T, PacketError>;

/// Properties of the packets above. Unknown but valid properties are
/// skipped on decode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    pub payload_format: Option<u8>,
    pub message_expiry: Option<u32>,
    pub content_type: Option<String>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Bytes>,
    pub session_expiry: Option<u32>,
    pub assigned_client_id: Option<String>,
    pub server_keep_alive: Option<u16>,
    pub reason_string: Option<String>,
    pub receive_maximum: Option<u16>,
    pub topic_alias_maximum: Option<u16>,
    pub maximum_qos: Option<u8>,
    pub retain_available: Option<u8>,
    pub maximum_packet_size: Option<u32>,
    pub user_properties: Vec<(String, String)>,
}

mod prop_id {
    pub const PAYLOAD_FORMAT: u8 = 0x01;
    pub const MESSAGE_EXPIRY: u8 = 0x02;
    pub const CONTENT_TYPE: u8 = 0x03;
    pub const RESPONSE_TOPIC: u8 = 0x08;
    pub const CORRELATION_DATA: u8 = 0x09;
    pub const SUBSCRIPTION_ID: u8 = 0x0B;
    pub const SESSION_EXPIRY: u8 = 0x11;
    pub const ASSIGNED_CLIENT_ID: u8 = 0x12;
    pub const SERVER_KEEP_ALIVE: u8 = 0x13;
    pub const AUTH_METHOD: u8 = 0x15;
    pub const AUTH_DATA: u8 = 0x16;
    pub const REQUEST_PROBLEM_INFO: u8 = 0x17;
    pub const WILL_DELAY: u8 = 0x18;
    pub const REQUEST_RESPONSE_INFO: u8 = 0x19;
    pub const RESPONSE_INFO: u8 = 0x1A;
    pub const SERVER_REFERENCE: u8 = 0x1C;
    pub const REASON_STRING: u8 = 0x1F;
    pub const RECEIVE_MAXIMUM: u8 = 0x21;
    pub const TOPIC_ALIAS_MAXIMUM: u8 = 0x22;
    pub const TOPIC_ALIAS: u8 = 0x23;
    pub const MAXIMUM_QOS: u8 = 0x24;
    pub const RETAIN_AVAILABLE: u8 = 0x25;
    pub const USER_PROPERTY: u8 = 0x26;
    pub const MAXIMUM_PACKET_SIZE: u8 = 0x27;
    pub const WILDCARD_SUB_AVAILABLE: u8 = 0x28;
    pub const SUB_ID_AVAILABLE: u8 = 0x29;
    pub const SHARED_SUB_AVAILABLE: u8 = 0x2A;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub protocol_level: u8,
    pub clean_start: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<Bytes>,
    pub properties: Properties,
}

impl Connect {
    pub fn new(client_id: &str, keep_alive: u16) -> Self {
        Self {
            protocol_level: PROTOCOL_LEVEL_V5,
            clean_start: true,
            keep_alive,
            client_id: client_id.to_string(),
            username: None,
            password: None,
            properties: Properties::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub reason_code: u8,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: u8,
    pub retain: bool,
    pub topic: String,
    /// Present for QoS > 0.
    pub packet_id: Option<u16>,
    pub properties: Properties,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    /// Topic filter and subscription options byte.
    pub filters: Vec<(String, u8)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub filters: Vec<String>,
}

/// Acknowledgement with a packet ID and reason codes (SUBACK, UNSUBACK).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub packet_id: u16,
    pub reason_codes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck { packet_id: u16, reason_code: u8 },
    Subscribe(Subscribe),
    SubAck(Ack),
    Unsubscribe(Unsubscribe),
    UnsubAck(Ack),
    PingReq,
    PingResp,
    Disconnect { reason_code: u8 },
}

mod packet_type {
    pub const CONNECT: u8 = 1;
    pub const CONNACK: u8 = 2;
    pub const PUBLISH: u8 = 3;
    pub const PUBACK: u8 = 4;
    pub const SUBSCRIBE: u8 = 8;
    pub const SUBACK: u8 = 9;
    pub const UNSUBSCRIBE: u8 = 10;
    pub const UNSUBACK: u8 = 11;
    pub const PINGREQ: u8 = 12;
    pub const PINGRESP: u8 = 13;
    pub const DISCONNECT: u8 = 14;
}

// ---------------------------------------------------------------------------
// primitives
// ---------------------------------------------------------------------------

fn put_varint(buf: &mut BytesMut, mut value: usize) {
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a variable byte integer from the front of a slice.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the value and
/// the number of bytes it took.
fn peek_varint(data: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, byte) in data.iter().enumerate().take(4) {
        value += (*byte as usize & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    if data.len() >= 4 {
        Err(PacketError::Malformed("variable byte integer too long"))
    } else {
        Ok(None)
    }
}

fn get_varint(buf: &mut Bytes) -> Result<usize> {
    match peek_varint(buf)? {
        Some((value, len)) => {
            buf.advance(len);
            Ok(value)
        }
        None => Err(PacketError::Malformed("truncated variable byte integer")),
    }
}

fn need(buf: &Bytes, n: usize) -> Result<()> {
    if buf.remaining() < n {
        Err(PacketError::Malformed("truncated packet"))
    } else {
        Ok(())
    }
}

fn get_u8(buf: &mut Bytes) -> Result<u8> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut Bytes) -> Result<u16> {
    need(buf, 2)?;
    Ok(buf.get_u16())
}

fn get_u32(buf: &mut Bytes) -> Result<u32> {
    need(buf, 4)?;
    Ok(buf.get_u32())
}

fn get_binary(buf: &mut Bytes) -> Result<Bytes> {
    let len = get_u16(buf)? as usize;
    need(buf, len)?;
    Ok(buf.split_to(len))
}

fn get_string(buf: &mut Bytes) -> Result<String> {
    let raw = get_binary(buf)?;
    String::from_utf8(raw.to_vec()).map_err(|_| PacketError::InvalidUtf8)
}

fn put_binary(buf: &mut BytesMut, data: &[u8]) -> Result<()> {
    let len = u16::try_from(data.len()).map_err(|_| PacketError::FieldTooLong(data.len()))?;
    buf.put_u16(len);
    buf.put_slice(data);
    Ok(())
}

fn put_string(buf: &mut BytesMut, s: &str) -> Result<()> {
    put_binary(buf, s.as_bytes())
}

// ---------------------------------------------------------------------------
// properties
// ---------------------------------------------------------------------------

impl Properties {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut props = BytesMut::new();
        if let Some(v) = self.payload_format {
            props.put_u8(prop_id::PAYLOAD_FORMAT);
            props.put_u8(v);
        }
        if let Some(v) = self.message_expiry {
            props.put_u8(prop_id::MESSAGE_EXPIRY);
            props.put_u32(v);
        }
        if let Some(v) = &self.content_type {
            props.put_u8(prop_id::CONTENT_TYPE);
            put_string(&mut props, v)?;
        }
        if let Some(v) = &self.response_topic {
            props.put_u8(prop_id::RESPONSE_TOPIC);
            put_string(&mut props, v)?;
        }
        if let Some(v) = &self.correlation_data {
            props.put_u8(prop_id::CORRELATION_DATA);
            put_binary(&mut props, v)?;
        }
        if let Some(v) = self.session_expiry {
            props.put_u8(prop_id::SESSION_EXPIRY);
            props.put_u32(v);
        }
        if let Some(v) = &self.assigned_client_id {
            props.put_u8(prop_id::ASSIGNED_CLIENT_ID);
            put_string(&mut props, v)?;
        }
        if let Some(v) = self.server_keep_alive {
            props.put_u8(prop_id::SERVER_KEEP_ALIVE);
            props.put_u16(v);
        }
        if let Some(v) = &self.reason_string {
            props.put_u8(prop_id::REASON_STRING);
            put_string(&mut props, v)?;
        }
        if let Some(v) = self.receive_maximum {
            props.put_u8(prop_id::RECEIVE_MAXIMUM);
            props.put_u16(v);
        }
        if let Some(v) = self.topic_alias_maximum {
            props.put_u8(prop_id::TOPIC_ALIAS_MAXIMUM);
            props.put_u16(v);
        }
        if let Some(v) = self.maximum_qos {
            props.put_u8(prop_id::MAXIMUM_QOS);
            props.put_u8(v);
        }
        if let Some(v) = self.retain_available {
            props.put_u8(prop_id::RETAIN_AVAILABLE);
            props.put_u8(v);
        }
        if let Some(v) = self.maximum_packet_size {
            props.put_u8(prop_id::MAXIMUM_PACKET_SIZE);
            props.put_u32(v);
        }
        for (k, v) in &self.user_properties {
            props.put_u8(prop_id::USER_PROPERTY);
            put_string(&mut props, k)?;
            put_string(&mut props, v)?;
        }
        put_varint(buf, props.len());
        buf.put_slice(&props);
        Ok(())
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        let len = get_varint(buf)?;
        need(buf, len)?;
        let mut data = buf.split_to(len);
        let mut props = Properties::default();
        while data.has_remaining() {
            let id = get_u8(&mut data)?;
            match id {
                prop_id::PAYLOAD_FORMAT => props.payload_format = Some(get_u8(&mut data)?),
                prop_id::MESSAGE_EXPIRY => props.message_expiry = Some(get_u32(&mut data)?),
                prop_id::CONTENT_TYPE => props.content_type = Some(get_string(&mut data)?),
                prop_id::RESPONSE_TOPIC => props.response_topic = Some(get_string(&mut data)?),
                prop_id::CORRELATION_DATA => {
                    props.correlation_data = Some(get_binary(&mut data)?)
                }
                prop_id::SESSION_EXPIRY => props.session_expiry = Some(get_u32(&mut data)?),
                prop_id::ASSIGNED_CLIENT_ID => {
                    props.assigned_client_id = Some(get_string(&mut data)?)
                }
                prop_id::SERVER_KEEP_ALIVE => {
                    props.server_keep_alive = Some(get_u16(&mut data)?)
                }
                prop_id::REASON_STRING => props.reason_string = Some(get_string(&mut data)?),
                prop_id::RECEIVE_MAXIMUM => props.receive_maximum = Some(get_u16(&mut data)?),
                prop_id::TOPIC_ALIAS_MAXIMUM => {
                    props.topic_alias_maximum = Some(get_u16(&mut data)?)
                }
                prop_id::MAXIMUM_QOS => props.maximum_qos = Some(get_u8(&mut data)?),
                prop_id::RETAIN_AVAILABLE => props.retain_available = Some(get_u8(&mut data)?),
                prop_id::MAXIMUM_PACKET_SIZE => {
                    props.maximum_packet_size = Some(get_u32(&mut data)?)
                }
                prop_id::USER_PROPERTY => {
                    let k = get_string(&mut data)?;
                    let v = get_string(&mut data)?;
                    props.user_properties.push((k, v));
                }
                // recognised, not used
                prop_id::SUBSCRIPTION_ID => {
                    get_varint(&mut data)?;
                }
                prop_id::REQUEST_PROBLEM_INFO
                | prop_id::REQUEST_RESPONSE_INFO
                | prop_id::WILDCARD_SUB_AVAILABLE
                | prop_id::SUB_ID_AVAILABLE
                | prop_id::SHARED_SUB_AVAILABLE => {
                    get_u8(&mut data)?;
                }
                prop_id::TOPIC_ALIAS => {
                    get_u16(&mut data)?;
                }
                prop_id::WILL_DELAY => {
                    get_u32(&mut data)?;
                }
                prop_id::AUTH_METHOD | prop_id::RESPONSE_INFO | prop_id::SERVER_REFERENCE => {
                    get_string(&mut data)?;
                }
                prop_id::AUTH_DATA => {
                    get_binary(&mut data)?;
                }
                _ => return Err(PacketError::Malformed("unknown property identifier")),
            }
        }
        Ok(props)
    }
}

// ---------------------------------------------------------------------------
// packets
// ---------------------------------------------------------------------------

impl Packet {
    /// Encode into `buf`, including the fixed header.
    ///
    /// Fails if a string or binary field exceeds 65535 bytes; `buf` is left
    /// untouched in that case.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut body = BytesMut::new();
        let header = match self {
            Packet::Connect(c) => {
                put_string(&mut body, "MQTT")?;
                body.put_u8(c.protocol_level);
                let mut flags = 0u8;
                if c.username.is_some() {
                    flags |= 0x80;
                }
                if c.password.is_some() {
                    flags |= 0x40;
                }
                if c.clean_start {
                    flags |= 0x02;
                }
                body.put_u8(flags);
                body.put_u16(c.keep_alive);
                c.properties.encode(&mut body)?;
                put_string(&mut body, &c.client_id)?;
                if let Some(u) = &c.username {
                    put_string(&mut body, u)?;
                }
                if let Some(p) = &c.password {
                    put_binary(&mut body, p)?;
                }
                packet_type::CONNECT << 4
            }
            Packet::ConnAck(a) => {
                body.put_u8(u8::from(a.session_present));
                body.put_u8(a.reason_code);
                a.properties.encode(&mut body)?;
                packet_type::CONNACK << 4
            }
            Packet::Publish(p) => {
                put_string(&mut body, &p.topic)?;
                if p.qos > 0 {
                    body.put_u16(p.packet_id.unwrap_or(1));
                }
                p.properties.encode(&mut body)?;
                body.put_slice(&p.payload);
                let mut flags = (p.qos & 0x03) << 1;
                if p.dup {
                    flags |= 0x08;
                }
                if p.retain {
                    flags |= 0x01;
                }
                (packet_type::PUBLISH << 4) | flags
            }
            Packet::PubAck {
                packet_id,
                reason_code,
            } => {
                body.put_u16(*packet_id);
                if *reason_code != reason::SUCCESS {
                    body.put_u8(*reason_code);
                }
                packet_type::PUBACK << 4
            }
            Packet::Subscribe(s) => {
                body.put_u16(s.packet_id);
                Properties::default().encode(&mut body)?;
                for (filter, options) in &s.filters {
                    put_string(&mut body, filter)?;
                    body.put_u8(*options);
                }
                (packet_type::SUBSCRIBE << 4) | 0x02
            }
            Packet::SubAck(a) => {
                body.put_u16(a.packet_id);
                Properties::default().encode(&mut body)?;
                body.put_slice(&a.reason_codes);
                packet_type::SUBACK << 4
            }
            Packet::Unsubscribe(u) => {
                body.put_u16(u.packet_id);
                Properties::default().encode(&mut body)?;
                for filter in &u.filters {
                    put_string(&mut body, filter)?;
                }
                (packet_type::UNSUBSCRIBE << 4) | 0x02
            }
            Packet::UnsubAck(a) => {
                body.put_u16(a.packet_id);
                Properties::default().encode(&mut body)?;
                body.put_slice(&a.reason_codes);
                packet_type::UNSUBACK << 4
            }
            Packet::PingReq => packet_type::PINGREQ << 4,
            Packet::PingResp => packet_type::PINGRESP << 4,
            Packet::Disconnect { reason_code } => {
                if *reason_code != reason::SUCCESS {
                    body.put_u8(*reason_code);
                }
                packet_type::DISCONNECT << 4
            }
        };
        buf.put_u8(header);
        put_varint(buf, body.len());
        buf.put_slice(&body);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode one packet from the front of `buf`.
    ///
    /// Returns `Ok(None)` if the buffer does not yet hold a complete packet;
    /// nothing is consumed in that case.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Packet>> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let Some((remaining, len_bytes)) = peek_varint(&buf[1..])? else {
            return Ok(None);
        };
        if remaining > MAX_PACKET_SIZE {
            return Err(PacketError::TooLarge(remaining));
        }
        let total = 1 + len_bytes + remaining;
        if buf.len() < total {
            return Ok(None);
        }
        let header = buf[0];
        let mut frame = buf.split_to(total).freeze();
        frame.advance(1 + len_bytes);
        Self::decode_body(header, frame).map(Some)
    }

    fn decode_body(header: u8, mut body: Bytes) -> Result<Packet> {
        let flags = header & 0x0F;
        let packet = match header >> 4 {
            packet_type::CONNECT => {
                let name = get_string(&mut body)?;
                if name != "MQTT" {
                    return Err(PacketError::Malformed("bad protocol name"));
                }
                let protocol_level = get_u8(&mut body)?;
                let connect_flags = get_u8(&mut body)?;
                let keep_alive = get_u16(&mut body)?;
                // older protocol levels have no properties; the caller rejects them
                let properties = if protocol_level >= PROTOCOL_LEVEL_V5 {
                    Properties::decode(&mut body)?
                } else {
                    Properties::default()
                };
                let client_id = get_string(&mut body)?;
                if connect_flags & 0x04 != 0 {
                    if protocol_level >= PROTOCOL_LEVEL_V5 {
                        Properties::decode(&mut body)?;
                    }
                    get_string(&mut body)?;
                    get_binary(&mut body)?;
                }
                let username = if connect_flags & 0x80 != 0 {
                    Some(get_string(&mut body)?)
                } else {
                    None
                };
                let password = if connect_flags & 0x40 != 0 {
                    Some(get_binary(&mut body)?)
                } else {
                    None
                };
                Packet::Connect(Connect {
                    protocol_level,
                    clean_start: connect_flags & 0x02 != 0,
                    keep_alive,
                    client_id,
                    username,
                    password,
                    properties,
                })
            }
            packet_type::CONNACK => {
                let ack_flags = get_u8(&mut body)?;
                let reason_code = get_u8(&mut body)?;
                let properties = if body.has_remaining() {
                    Properties::decode(&mut body)?
                } else {
                    Properties::default()
                };
                Packet::ConnAck(ConnAck {
                    session_present: ack_flags & 0x01 != 0,
                    reason_code,
                    properties,
                })
            }
            packet_type::PUBLISH => {
                let qos = (flags >> 1) & 0x03;
                if qos > 2 {
                    return Err(PacketError::Malformed("invalid QoS"));
                }
                let topic = get_string(&mut body)?;
                let packet_id = if qos > 0 {
                    Some(get_u16(&mut body)?)
                } else {
                    None
                };
                let properties = Properties::decode(&mut body)?;
                Packet::Publish(Publish {
                    dup: flags & 0x08 != 0,
                    qos,
                    retain: flags & 0x01 != 0,
                    topic,
                    packet_id,
                    properties,
                    payload: body,
                })
            }
            packet_type::PUBACK => {
                let packet_id = get_u16(&mut body)?;
                let reason_code = if body.has_remaining() {
                    get_u8(&mut body)?
                } else {
                    reason::SUCCESS
                };
                Packet::PubAck {
                    packet_id,
                    reason_code,
                }
            }
            packet_type::SUBSCRIBE => {
                let packet_id = get_u16(&mut body)?;
                Properties::decode(&mut body)?;
                let mut filters = Vec::new();
                while body.has_remaining() {
                    let filter = get_string(&mut body)?;
                    let options = get_u8(&mut body)?;
                    filters.push((filter, options));
                }
                if filters.is_empty() {
                    return Err(PacketError::Malformed("SUBSCRIBE without filters"));
                }
                Packet::Subscribe(Subscribe { packet_id, filters })
            }
            packet_type::SUBACK | packet_type::UNSUBACK => {
                let packet_id = get_u16(&mut body)?;
                Properties::decode(&mut body)?;
                let ack = Ack {
                    packet_id,
                    reason_codes: body.to_vec(),
                };
                if header >> 4 == packet_type::SUBACK {
                    Packet::SubAck(ack)
                } else {
                    Packet::UnsubAck(ack)
                }
            }
            packet_type::UNSUBSCRIBE => {
                let packet_id = get_u16(&mut body)?;
                Properties::decode(&mut body)?;
                let mut filters = Vec::new();
                while body.has_remaining() {
                    filters.push(get_string(&mut body)?);
                }
                Packet::Unsubscribe(Unsubscribe { packet_id, filters })
            }
            packet_type::PINGREQ => Packet::PingReq,
            packet_type::PINGRESP => Packet::PingResp,
            packet_type::DISCONNECT => Packet::Disconnect {
                reason_code: if body.has_remaining() {
                    get_u8(&mut body)?
                } else {
                    reason::SUCCESS
                },
            },
            other => return Err(PacketError::UnsupportedType(other)),
        };
        Ok(packet)
    }
}

/// Read the next packet, buffering partial input in `buf`.
///
/// Returns `Ok(None)` on a clean end of stream between packets. Cancel
/// safe: a partially read packet stays in `buf`.
pub async fn read_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut BytesMut,
) -> Result<Option<Packet>> {
    loop {
        if let Some(packet) = Packet::decode(buf)? {
            return Ok(Some(packet));
        }
        if reader.read_buf(buf).await? == 0 {
            return if buf.is_empty() {
                Ok(None)
            } else {
                Err(PacketError::UnexpectedEof)
            };
        }
    }
}

/// Encode and write one packet.
pub async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, packet: &Packet) -> Result<()> {
    writer.write_all(&packet.to_bytes()?).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(packet: Packet) -> Packet {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();
        let decoded = Packet::decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        decoded
    }

    #[test]
    fn test_varint_boundaries() {
        for value in [0usize, 127, 128, 16_383, 16_384, 2_097_151, 2_097_152] {
            let mut buf = BytesMut::new();
            put_varint(&mut buf, value);
            assert_eq!(peek_varint(&buf).unwrap(), Some((value, buf.len())));
        }
        assert!(peek_varint(&[0x80, 0x80, 0x80, 0x80]).is_err());
        assert_eq!(peek_varint(&[0x80]).unwrap(), None);
    }

    #[test]
    fn test_connect_with_credentials() {
        let mut connect = Connect::new("MQTT-abc", 30);
        connect.username = Some("agent1".into());
        connect.password = Some(Bytes::from_static(b"token"));
        let Packet::Connect(decoded) = round_trip(Packet::Connect(connect.clone())) else {
            panic!("expected CONNECT");
        };
        assert_eq!(decoded, connect);
    }

    #[test]
    fn test_publish_properties() {
        let publish = Publish {
            dup: false,
            qos: 1,
            retain: false,
            topic: "things/agent1/thing1/invokeaction/action1".into(),
            packet_id: Some(7),
            properties: Properties {
                response_topic: Some("INBOX/MQTT-abc".into()),
                correlation_data: Some(Bytes::from_static(b"cid-1")),
                content_type: Some("application/json".into()),
                user_properties: vec![("k".into(), "v".into())],
                ..Default::default()
            },
            payload: Bytes::from_static(b"{\"a\":1}"),
        };
        assert_eq!(
            round_trip(Packet::Publish(publish.clone())),
            Packet::Publish(publish)
        );
    }

    #[test]
    fn test_acks_and_control_packets() {
        for packet in [
            Packet::PubAck {
                packet_id: 3,
                reason_code: reason::SUCCESS,
            },
            Packet::SubAck(Ack {
                packet_id: 4,
                reason_codes: vec![reason::GRANTED_QOS_1],
            }),
            Packet::Unsubscribe(Unsubscribe {
                packet_id: 5,
                filters: vec!["INBOX/x".into()],
            }),
            Packet::PingReq,
            Packet::PingResp,
            Packet::Disconnect {
                reason_code: reason::KEEP_ALIVE_TIMEOUT,
            },
        ] {
            assert_eq!(round_trip(packet.clone()), packet);
        }
    }

    #[test]
    fn test_partial_input_consumes_nothing() {
        let bytes = Packet::PingReq.to_bytes().unwrap();
        let mut buf = BytesMut::from(&bytes[..1]);
        assert!(Packet::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 1);
        buf.extend_from_slice(&bytes[1..]);
        assert_eq!(Packet::decode(&mut buf).unwrap(), Some(Packet::PingReq));
    }

    #[test]
    fn test_rejects_oversized_and_unknown() {
        let mut buf = BytesMut::new();
        buf.put_u8(packet_type::PUBLISH << 4);
        put_varint(&mut buf, MAX_PACKET_SIZE + 1);
        assert!(matches!(
            Packet::decode(&mut buf),
            Err(PacketError::TooLarge(_))
        ));

        let mut buf = BytesMut::from(&[0xF0u8, 0x00][..]);
        assert!(matches!(
            Packet::decode(&mut buf),
            Err(PacketError::UnsupportedType(15))
        ));
    }

    #[test]
    fn test_oversized_fields_are_refused() {
        let mut publish = Publish {
            dup: false,
            qos: 0,
            retain: false,
            topic: "t".repeat(70_000),
            packet_id: None,
            properties: Properties::default(),
            payload: Bytes::from_static(b"1"),
        };
        let mut buf = BytesMut::new();
        assert!(matches!(
            Packet::Publish(publish.clone()).encode(&mut buf),
            Err(PacketError::FieldTooLong(70_000))
        ));
        assert!(buf.is_empty());

        publish.topic = "things/agent1/thing1".into();
        publish.properties.correlation_data = Some(Bytes::from(vec![0u8; 65_536]));
        assert!(Packet::Publish(publish.clone()).to_bytes().is_err());

        publish.properties.correlation_data = Some(Bytes::from(vec![0u8; 65_535]));
        assert_eq!(
            round_trip(Packet::Publish(publish.clone())),
            Packet::Publish(publish)
        );
    }

    #[tokio::test]
    async fn test_read_packet_from_stream() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_packet(&mut client, &Packet::PingReq).await.unwrap();
        write_packet(&mut client, &Packet::Disconnect { reason_code: 0 })
            .await
            .unwrap();
        drop(client);

        let mut buf = BytesMut::new();
        assert_eq!(
            read_packet(&mut server, &mut buf).await.unwrap(),
            Some(Packet::PingReq)
        );
        assert_eq!(
            read_packet(&mut server, &mut buf).await.unwrap(),
            Some(Packet::Disconnect { reason_code: 0 })
        );
        assert_eq!(read_packet(&mut server, &mut buf).await.unwrap(), None);
    }
}
