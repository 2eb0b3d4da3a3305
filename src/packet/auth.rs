use std::collections::BTreeMap;

use md5::{Digest, Md5};
use subtle::ConstantTimeEq;
use thiserror::Error;

use super::OspfPacketHeader;

pub const MD5_DIGEST_LEN: usize = 16;
pub const SIMPLE_KEY_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum AuthType {
    None = 0,
    Simple = 1,
    Crypt = 2,
}

#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("authentication type {got} but interface expects {expected:?}")]
    TypeMismatch { got: u16, expected: AuthType },
    #[error("bad checksum")]
    Checksum,
    #[error("simple password mismatch")]
    BadKey,
    #[error("no key with id {0}")]
    UnknownKey(u8),
    #[error("digest trailer missing or of wrong size")]
    BadTrailer,
    #[error("digest mismatch")]
    BadDigest,
    #[error("replayed sequence number {got}, last seen {last}")]
    Replay { got: u32, last: u32 },
}

#[derive(Clone, Debug, PartialEq)]
pub enum AuthKind {
    None,
    Simple([u8; SIMPLE_KEY_LEN]),
    /// all keys verify, only `key_id` signs
    Crypt {
        keys: BTreeMap<u8, [u8; MD5_DIGEST_LEN]>,
        key_id: u8,
    },
}

/// per interface authentication state
#[derive(Clone, Debug)]
pub struct Auth {
    kind: AuthKind,
    crypt_seq: u32,
}

pub fn pad_key<const N: usize>(key: &[u8]) -> [u8; N] {
    let mut padded = [0u8; N];
    let len = key.len().min(N);
    padded[..len].copy_from_slice(&key[..len]);
    padded
}

impl Auth {
    pub fn new(kind: AuthKind, crypt_seq: u32) -> Self {
        Self { kind, crypt_seq }
    }

    pub fn none() -> Self {
        Self::new(AuthKind::None, 0)
    }

    pub fn simple(key: &[u8]) -> Self {
        Self::new(AuthKind::Simple(pad_key(key)), 0)
    }

    pub fn kind(&self) -> &AuthKind {
        &self.kind
    }

    /// key rotation. the outgoing crypto sequence keeps counting up.
    pub fn rekey(&mut self, kind: AuthKind) {
        self.kind = kind;
    }

    pub fn auth_type(&self) -> AuthType {
        match self.kind {
            AuthKind::None => AuthType::None,
            AuthKind::Simple(_) => AuthType::Simple,
            AuthKind::Crypt { .. } => AuthType::Crypt,
        }
    }

    pub fn trailer_len(&self) -> usize {
        match self.kind {
            AuthKind::Crypt { .. } => MD5_DIGEST_LEN,
            _ => 0,
        }
    }

    /// finish a packet whose length field is already set
    pub fn sign(&mut self, buf: &mut Vec<u8>) {
        if buf.len() < OspfPacketHeader::length() {
            return;
        }
        buf[14..16].copy_from_slice(&(self.auth_type() as u16).to_be_bytes());
        match &self.kind {
            AuthKind::None => {
                buf[16..24].fill(0);
                let checksum = super::packet_checksum(buf);
                buf[12..14].copy_from_slice(&checksum.to_be_bytes());
            }
            AuthKind::Simple(key) => {
                let checksum = super::packet_checksum(buf);
                buf[12..14].copy_from_slice(&checksum.to_be_bytes());
                buf[16..24].copy_from_slice(key);
            }
            AuthKind::Crypt { keys, key_id } => {
                let Some(key) = keys.get(key_id) else {
                    tracing::warn!(key_id, "active md key missing, packet left unsigned");
                    return;
                };
                buf[12..14].fill(0);
                buf[16] = 0;
                buf[17] = 0;
                buf[18] = *key_id;
                buf[19] = MD5_DIGEST_LEN as u8;
                buf[20..24].copy_from_slice(&self.crypt_seq.to_be_bytes());
                self.crypt_seq = self.crypt_seq.wrapping_add(1);
                let digest = md5_digest(buf, key);
                buf.extend_from_slice(&digest);
            }
        }
    }

    /// # verify
    /// check an incoming packet against this interface's configuration.
    /// - last_seq : highest crypto sequence accepted from the sender so far
    /// - returns the crypto sequence carried by the packet, if any
    pub fn verify(
        &self,
        data: &[u8],
        header: &OspfPacketHeader,
        last_seq: Option<u32>,
    ) -> Result<Option<u32>, AuthError> {
        let expected = self.auth_type();
        if header.auth_type != expected as u16 {
            return Err(AuthError::TypeMismatch {
                got: header.auth_type,
                expected,
            });
        }
        let packet = &data[..header.packet_length as usize];
        match &self.kind {
            AuthKind::None => {
                check_sum(packet, header)?;
                Ok(None)
            }
            AuthKind::Simple(key) => {
                if !bool::from(header.authentication.ct_eq(key)) {
                    return Err(AuthError::BadKey);
                }
                check_sum(packet, header)?;
                Ok(None)
            }
            AuthKind::Crypt { keys, .. } => {
                let key_id = header.authentication[2];
                let auth_len = header.authentication[3] as usize;
                let seq = u32::from_be_bytes([
                    header.authentication[4],
                    header.authentication[5],
                    header.authentication[6],
                    header.authentication[7],
                ]);
                let key = keys.get(&key_id).ok_or(AuthError::UnknownKey(key_id))?;
                let end = packet.len() + MD5_DIGEST_LEN;
                if auth_len != MD5_DIGEST_LEN || data.len() < end {
                    return Err(AuthError::BadTrailer);
                }
                if let Some(last) = last_seq {
                    if seq <= last {
                        return Err(AuthError::Replay { got: seq, last });
                    }
                }
                let digest = md5_digest(packet, key);
                if !bool::from(digest.as_slice().ct_eq(&data[packet.len()..end])) {
                    return Err(AuthError::BadDigest);
                }
                Ok(Some(seq))
            }
        }
    }
}

fn check_sum(packet: &[u8], header: &OspfPacketHeader) -> Result<(), AuthError> {
    if super::packet_checksum(packet) != header.checksum {
        return Err(AuthError::Checksum);
    }
    Ok(())
}

fn md5_digest(packet: &[u8], key: &[u8; MD5_DIGEST_LEN]) -> [u8; MD5_DIGEST_LEN] {
    let mut hasher = Md5::new();
    hasher.update(packet);
    hasher.update(key);
    let mut digest = [0u8; MD5_DIGEST_LEN];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

#[cfg(test)]
mod tests {
    use std::net;

    use super::*;
    use crate::packet::{self, LsAckPacket};

    fn signed(auth: &mut Auth) -> Vec<u8> {
        packet::encode(
            &LsAckPacket { headers: vec![] },
            net::Ipv4Addr::new(1, 1, 1, 1),
            net::Ipv4Addr::UNSPECIFIED,
            auth,
        )
    }

    fn crypt(keys: &[(u8, &[u8])], key_id: u8) -> Auth {
        Auth::new(
            AuthKind::Crypt {
                keys: keys.iter().map(|(id, key)| (*id, pad_key(key))).collect(),
                key_id,
            },
            100,
        )
    }

    #[test]
    fn none_checks_checksum() {
        let mut auth = Auth::none();
        let mut data = signed(&mut auth);
        let header = OspfPacketHeader::try_from_be_bytes(&data).unwrap();
        assert_eq!(auth.verify(&data, &header, None), Ok(None));
        data[5] ^= 0xff;
        let header = OspfPacketHeader::try_from_be_bytes(&data).unwrap();
        assert_eq!(auth.verify(&data, &header, None), Err(AuthError::Checksum));
    }

    #[test]
    fn simple_password() {
        let mut auth = Auth::simple(b"secret");
        let data = signed(&mut auth);
        assert_eq!(&data[16..22], b"secret");
        let header = OspfPacketHeader::try_from_be_bytes(&data).unwrap();
        assert_eq!(auth.verify(&data, &header, None), Ok(None));
        assert_eq!(
            Auth::simple(b"other").verify(&data, &header, None),
            Err(AuthError::BadKey)
        );
        assert!(matches!(
            Auth::none().verify(&data, &header, None),
            Err(AuthError::TypeMismatch { got: 1, .. })
        ));
    }

    #[test]
    fn md5_multiple_keys_and_replay() {
        let mut signer = crypt(&[(1, b"old"), (2, b"new")], 2);
        let verifier = crypt(&[(1, b"old"), (2, b"new")], 1);

        let first = signed(&mut signer);
        let header = OspfPacketHeader::try_from_be_bytes(&first).unwrap();
        // the digest rides behind the nominal length and the checksum is unused
        assert_eq!(first.len(), header.packet_length as usize + MD5_DIGEST_LEN);
        assert_eq!(header.checksum, 0);
        assert_eq!(header.authentication[2], 2);
        assert_eq!(verifier.verify(&first, &header, None), Ok(Some(100)));

        let second = signed(&mut signer);
        let header2 = OspfPacketHeader::try_from_be_bytes(&second).unwrap();
        assert_eq!(verifier.verify(&second, &header2, Some(100)), Ok(Some(101)));
        // replaying the first packet after the second was accepted
        assert_eq!(
            verifier.verify(&first, &header, Some(101)),
            Err(AuthError::Replay { got: 100, last: 101 })
        );

        let only_old = crypt(&[(1, b"old")], 1);
        assert_eq!(
            only_old.verify(&second, &header2, None),
            Err(AuthError::UnknownKey(2))
        );

        let mut tampered = second.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 1;
        assert_eq!(
            verifier.verify(&tampered, &header2, None),
            Err(AuthError::BadDigest)
        );
    }

    #[test]
    fn rekey_keeps_sequence() {
        let mut auth = crypt(&[(1, b"a")], 1);
        signed(&mut auth);
        auth.rekey(crypt(&[(2, b"b")], 2).kind().clone());
        let data = signed(&mut auth);
        let header = OspfPacketHeader::try_from_be_bytes(&data).unwrap();
        assert_eq!(header.authentication[2], 2);
        assert_eq!(&header.authentication[4..8], &101u32.to_be_bytes());
    }
}
