pub mod auth;
pub mod dd;
pub mod hello;
pub mod lsack;
pub mod lsr;
pub mod lsu;

use std::net;

use bytes::{Buf, BufMut};
use thiserror::Error;

pub use dd::DbDescPacket;
pub use hello::HelloPacket;
pub use lsack::LsAckPacket;
pub use lsr::{LsRequestPacket, LsrEntry};
pub use lsu::LsUpdatePacket;

pub const HELLO_TYPE: u8 = 1;
pub const DB_DESC_TYPE: u8 = 2;
pub const LS_REQUEST_TYPE: u8 = 3;
pub const LS_UPDATE_TYPE: u8 = 4;
pub const LS_ACK_TYPE: u8 = 5;

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),
    #[error("unsupported version {0}")]
    BadVersion(u8),
    #[error("length field {0} does not match buffer of {1} bytes")]
    BadLength(u16, usize),
    #[error("unknown packet type {0}")]
    UnknownType(u8),
    #[error("malformed {0} body")]
    BadBody(&'static str),
    #[error("authentication failed: {0}")]
    Auth(#[from] auth::AuthError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OspfPacketHeader {
    pub version: u8,
    pub packet_type: u8,
    pub packet_length: u16,
    pub router_id: net::Ipv4Addr,
    pub area_id: net::Ipv4Addr,
    pub checksum: u16,
    pub auth_type: u16,
    pub authentication: [u8; 8],
}

impl OspfPacketHeader {
    pub fn length() -> usize {
        24
    }

    pub fn try_from_be_bytes(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() < Self::length() {
            return Err(DecodeError::TooShort(payload.len()));
        }
        let mut buf = payload;
        let version = buf.get_u8();
        let packet_type = buf.get_u8();
        let packet_length = buf.get_u16();
        let router_id = net::Ipv4Addr::from(buf.get_u32());
        let area_id = net::Ipv4Addr::from(buf.get_u32());
        let checksum = buf.get_u16();
        let auth_type = buf.get_u16();
        let mut authentication = [0u8; 8];
        buf.copy_to_slice(&mut authentication);
        if version != crate::OSPF_VERSION {
            return Err(DecodeError::BadVersion(version));
        }
        if (packet_length as usize) < Self::length() || packet_length as usize > payload.len() {
            return Err(DecodeError::BadLength(packet_length, payload.len()));
        }
        Ok(Self {
            version,
            packet_type,
            packet_length,
            router_id,
            area_id,
            checksum,
            auth_type,
            authentication,
        })
    }

    pub fn put(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.packet_type);
        buf.put_u16(self.packet_length);
        buf.put_u32(self.router_id.into());
        buf.put_u32(self.area_id.into());
        buf.put_u16(self.checksum);
        buf.put_u16(self.auth_type);
        buf.put_slice(&self.authentication);
    }
}

pub trait OspfPacket {
    fn packet_type(&self) -> u8;
    /// body length, common header excluded
    fn length(&self) -> usize;
    fn put(&self, buf: &mut Vec<u8>);
}

#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Hello(HelloPacket),
    DbDesc(DbDescPacket),
    LsRequest(LsRequestPacket),
    LsUpdate(LsUpdatePacket),
    LsAck(LsAckPacket),
}

impl Packet {
    /// decode the body that follows an already verified header
    pub fn decode_body(header: &OspfPacketHeader, data: &[u8]) -> Result<Self, DecodeError> {
        let body = &data[OspfPacketHeader::length()..header.packet_length as usize];
        match header.packet_type {
            HELLO_TYPE => HelloPacket::try_from_be_bytes(body)
                .map(Packet::Hello)
                .ok_or(DecodeError::BadBody("hello")),
            DB_DESC_TYPE => DbDescPacket::try_from_be_bytes(body)
                .map(Packet::DbDesc)
                .ok_or(DecodeError::BadBody("database description")),
            LS_REQUEST_TYPE => LsRequestPacket::try_from_be_bytes(body)
                .map(Packet::LsRequest)
                .ok_or(DecodeError::BadBody("link state request")),
            LS_UPDATE_TYPE => LsUpdatePacket::try_from_be_bytes(body)
                .map(Packet::LsUpdate)
                .ok_or(DecodeError::BadBody("link state update")),
            LS_ACK_TYPE => LsAckPacket::try_from_be_bytes(body)
                .map(Packet::LsAck)
                .ok_or(DecodeError::BadBody("link state ack")),
            other => Err(DecodeError::UnknownType(other)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Packet::Hello(_) => "hello",
            Packet::DbDesc(_) => "db description",
            Packet::LsRequest(_) => "ls request",
            Packet::LsUpdate(_) => "ls update",
            Packet::LsAck(_) => "ls ack",
        }
    }
}

/// # encode
/// serialize header and body, then checksum and authenticate once the length is final.
/// - auth : the sending interface's authentication state, its crypto sequence advances
pub fn encode(
    body: &dyn OspfPacket,
    router_id: net::Ipv4Addr,
    area_id: net::Ipv4Addr,
    auth: &mut auth::Auth,
) -> Vec<u8> {
    let length = OspfPacketHeader::length() + body.length();
    let mut buf = Vec::with_capacity(length + auth::MD5_DIGEST_LEN);
    OspfPacketHeader {
        version: crate::OSPF_VERSION,
        packet_type: body.packet_type(),
        packet_length: length as u16,
        router_id,
        area_id,
        checksum: 0,
        auth_type: auth.auth_type() as u16,
        authentication: [0; 8],
    }
    .put(&mut buf);
    body.put(&mut buf);
    auth.sign(&mut buf);
    buf
}

/// internet checksum over the packet with the authentication field left out
pub fn packet_checksum(packet: &[u8]) -> u16 {
    let mut scratch = packet.to_vec();
    if scratch.len() >= OspfPacketHeader::length() {
        scratch[16..24].fill(0);
    }
    // word 6 is the checksum field itself
    pnet::util::checksum(&scratch, 6)
}

/// how many bytes of body fit in one packet sent on an interface with this mtu
pub fn max_body(mtu: u16, auth: &auth::Auth) -> usize {
    let overhead = 20 + OspfPacketHeader::length() + auth.trailer_len();
    (mtu as usize).saturating_sub(overhead)
}
