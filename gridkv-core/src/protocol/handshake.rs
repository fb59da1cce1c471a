//! Handshake negotiation messages.
//!
//! The handshake is the first exchange on a fresh socket, before any framed
//! request. The client proposes a protocol version, its client code, a
//! feature bitmask, and optional credentials; the server either accepts
//! (reporting its own feature bitmask and, on newer servers, its node id) or
//! rejects with its supported version, a message, and a status code.
//!
//! Both directions are encoded here so integration tests can stand up mock
//! servers speaking the exact same bytes.

use bytes::{Bytes, BytesMut};
use uuid::Uuid;

use crate::binary::{BinaryReader, BinaryWriter};
use crate::error::{GridError, Result};
use crate::protocol::constants::*;
use crate::protocol::frame::write_frame;

/// A protocol version triple negotiated during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    /// Major version.
    pub major: i16,
    /// Minor version.
    pub minor: i16,
    /// Patch version.
    pub patch: i16,
}

impl ProtocolVersion {
    /// Creates a version triple.
    pub const fn new(major: i16, minor: i16, patch: i16) -> Self {
        Self { major, minor, patch }
    }

    /// Returns `true` if this version carries the feature bitmask and
    /// response header flags required for partition awareness.
    pub fn supports_partition_awareness(&self) -> bool {
        *self >= VERSION_1_4_0
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// First protocol version with feature bitmasks and partition awareness.
pub const VERSION_1_4_0: ProtocolVersion = ProtocolVersion::new(1, 4, 0);

/// Current protocol version proposed by default.
pub const VERSION_1_7_0: ProtocolVersion = ProtocolVersion::new(1, 7, 0);

/// Versions this client can speak, newest first.
pub const SUPPORTED_VERSIONS: &[ProtocolVersion] = &[VERSION_1_7_0, VERSION_1_4_0];

/// The client half of the handshake.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    /// Proposed protocol version.
    pub version: ProtocolVersion,
    /// Requested feature bitmask (only transmitted from 1.4.0 on).
    pub features: u8,
    /// Optional user name.
    pub username: Option<String>,
    /// Optional password, transmitted only together with a user name.
    pub password: Option<String>,
}

impl HandshakeRequest {
    /// Encodes the request as a complete length-prefixed frame.
    pub fn encode(&self) -> BytesMut {
        let mut w = BinaryWriter::with_capacity(32);
        w.write_i8(HANDSHAKE_CODE);
        w.write_i16(self.version.major);
        w.write_i16(self.version.minor);
        w.write_i16(self.version.patch);
        w.write_i8(CLIENT_CODE_THIN);
        if self.version.supports_partition_awareness() {
            w.write_bytes(&[self.features]);
        }
        if let Some(user) = &self.username {
            w.write_string(user);
            w.write_string(self.password.as_deref().unwrap_or(""));
        }

        let mut framed = BytesMut::new();
        write_frame(&mut framed, w.as_slice());
        framed
    }

    /// Decodes a request from an already de-framed payload.
    pub fn decode(payload: Bytes) -> Result<Self> {
        let mut r = BinaryReader::new(payload);
        let code = r.read_i8()?;
        if code != HANDSHAKE_CODE {
            return Err(GridError::HandshakeFailed(format!(
                "unexpected message code {} where handshake was expected",
                code
            )));
        }
        let version = ProtocolVersion::new(r.read_i16()?, r.read_i16()?, r.read_i16()?);
        let client_code = r.read_i8()?;
        if client_code != CLIENT_CODE_THIN {
            return Err(GridError::HandshakeFailed(format!(
                "unsupported client code {}",
                client_code
            )));
        }
        let features = if version.supports_partition_awareness() {
            *r.read_bytes()?.first().unwrap_or(&0)
        } else {
            0
        };
        let (username, password) = if r.remaining() > 0 {
            (Some(r.read_string()?), Some(r.read_string()?))
        } else {
            (None, None)
        };
        Ok(Self {
            version,
            features,
            username,
            password,
        })
    }
}

/// The server half of the handshake.
#[derive(Debug, Clone)]
pub enum HandshakeResponse {
    /// Negotiation succeeded.
    Accepted {
        /// Feature bitmask granted by the server.
        features: u8,
        /// The server's node id; absent on legacy servers.
        node_id: Option<Uuid>,
    },
    /// Negotiation rejected.
    Rejected {
        /// The newest protocol version the server speaks.
        server_version: ProtocolVersion,
        /// Human-readable rejection reason.
        message: String,
        /// Server status code; [`STATUS_AUTH_FAILED`] marks bad credentials.
        code: i32,
    },
}

impl HandshakeResponse {
    /// Encodes the response as a complete length-prefixed frame.
    ///
    /// `requested` is the version the client proposed; it controls whether
    /// the accepted form carries a feature bitmask and node id.
    pub fn encode(&self, requested: ProtocolVersion) -> BytesMut {
        let mut w = BinaryWriter::with_capacity(32);
        match self {
            Self::Accepted { features, node_id } => {
                w.write_i8(HANDSHAKE_SUCCESS);
                if requested.supports_partition_awareness() {
                    w.write_bytes(&[*features]);
                    match node_id {
                        Some(id) => {
                            w.write_bool(true);
                            w.write_uuid(id);
                        }
                        None => w.write_bool(false),
                    }
                }
            }
            Self::Rejected {
                server_version,
                message,
                code,
            } => {
                w.write_i8(0);
                w.write_i16(server_version.major);
                w.write_i16(server_version.minor);
                w.write_i16(server_version.patch);
                w.write_string(message);
                w.write_i32(*code);
            }
        }

        let mut framed = BytesMut::new();
        write_frame(&mut framed, w.as_slice());
        framed
    }

    /// Decodes a response from an already de-framed payload.
    pub fn decode(payload: Bytes, requested: ProtocolVersion) -> Result<Self> {
        let mut r = BinaryReader::new(payload);
        let success = r.read_i8()?;
        if success == HANDSHAKE_SUCCESS {
            if !requested.supports_partition_awareness() {
                return Ok(Self::Accepted {
                    features: 0,
                    node_id: None,
                });
            }
            let features = *r.read_bytes()?.first().unwrap_or(&0);
            let node_id = if r.read_bool()? {
                Some(r.read_uuid()?)
            } else {
                None
            };
            Ok(Self::Accepted { features, node_id })
        } else {
            let server_version =
                ProtocolVersion::new(r.read_i16()?, r.read_i16()?, r.read_i16()?);
            let message = r.read_string()?;
            let code = r.read_i32()?;
            Ok(Self::Rejected {
                server_version,
                message,
                code,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::read_frame;

    fn de_frame(mut framed: BytesMut) -> Bytes {
        read_frame(&mut framed).expect("complete frame").freeze()
    }

    #[test]
    fn test_version_ordering() {
        assert!(VERSION_1_7_0 > VERSION_1_4_0);
        assert!(ProtocolVersion::new(2, 0, 0) > VERSION_1_7_0);
        assert!(ProtocolVersion::new(1, 4, 1) > VERSION_1_4_0);
    }

    #[test]
    fn test_partition_awareness_version_gate() {
        assert!(VERSION_1_7_0.supports_partition_awareness());
        assert!(VERSION_1_4_0.supports_partition_awareness());
        assert!(!ProtocolVersion::new(1, 2, 0).supports_partition_awareness());
    }

    #[test]
    fn test_request_round_trip_with_credentials() {
        let req = HandshakeRequest {
            version: VERSION_1_7_0,
            features: FEATURE_PARTITION_AWARENESS,
            username: Some("grid-admin".into()),
            password: Some("s3cret".into()),
        };

        let decoded = HandshakeRequest::decode(de_frame(req.encode())).unwrap();
        assert_eq!(decoded.version, VERSION_1_7_0);
        assert_eq!(decoded.features, FEATURE_PARTITION_AWARENESS);
        assert_eq!(decoded.username.as_deref(), Some("grid-admin"));
        assert_eq!(decoded.password.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_request_round_trip_without_credentials() {
        let req = HandshakeRequest {
            version: VERSION_1_7_0,
            features: 0,
            username: None,
            password: None,
        };

        let decoded = HandshakeRequest::decode(de_frame(req.encode())).unwrap();
        assert!(decoded.username.is_none());
        assert!(decoded.password.is_none());
    }

    #[test]
    fn test_legacy_request_omits_features() {
        let legacy = ProtocolVersion::new(1, 2, 0);
        let req = HandshakeRequest {
            version: legacy,
            features: FEATURE_PARTITION_AWARENESS,
            username: None,
            password: None,
        };

        let decoded = HandshakeRequest::decode(de_frame(req.encode())).unwrap();
        assert_eq!(decoded.features, 0);
    }

    #[test]
    fn test_accepted_round_trip() {
        let node = Uuid::new_v4();
        let resp = HandshakeResponse::Accepted {
            features: FEATURE_PARTITION_AWARENESS,
            node_id: Some(node),
        };

        let decoded =
            HandshakeResponse::decode(de_frame(resp.encode(VERSION_1_7_0)), VERSION_1_7_0)
                .unwrap();
        match decoded {
            HandshakeResponse::Accepted { features, node_id } => {
                assert_eq!(features, FEATURE_PARTITION_AWARENESS);
                assert_eq!(node_id, Some(node));
            }
            other => panic!("expected accepted, got {:?}", other),
        }
    }

    #[test]
    fn test_rejected_round_trip() {
        let resp = HandshakeResponse::Rejected {
            server_version: VERSION_1_4_0,
            message: "version not supported".into(),
            code: 1,
        };

        let decoded =
            HandshakeResponse::decode(de_frame(resp.encode(VERSION_1_7_0)), VERSION_1_7_0)
                .unwrap();
        match decoded {
            HandshakeResponse::Rejected {
                server_version,
                message,
                code,
            } => {
                assert_eq!(server_version, VERSION_1_4_0);
                assert_eq!(message, "version not supported");
                assert_eq!(code, 1);
            }
            other => panic!("expected rejected, got {:?}", other),
        }
    }
}
