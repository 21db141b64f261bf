use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of the header prepended to every serialized protocol object.
pub const HEADER_SIZE: usize = 8;

pub(crate) fn messagepack_serialize<T>(obj: &T) -> Box<[u8]>
where
    T: Serialize,
{
    // Note: we are using a binary format here.
    // This means that `u8` arrays will be serialized as bytestrings.

    // Every protocol object consists of `serde`-derived fields over in-memory values,
    // so a failure here is a logical bug rather than a recoverable condition.
    rmp_serde::to_vec(obj)
        .map(|vec| vec.into_boxed_slice())
        .expect("Error serializing into MessagePack")
}

pub(crate) fn messagepack_deserialize<'a, T>(bytes: &'a [u8]) -> Result<T, String>
where
    T: Deserialize<'a>,
{
    rmp_serde::from_slice(bytes).map_err(|err| err.to_string())
}

#[derive(Debug, PartialEq, Eq)]
struct ProtocolObjectHeader {
    brand: [u8; 4],
    major_version: u16,
    minor_version: u16,
}

impl ProtocolObjectHeader {
    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[..4].copy_from_slice(&self.brand);
        header[4..6].copy_from_slice(&self.major_version.to_be_bytes());
        header[6..].copy_from_slice(&self.minor_version.to_be_bytes());
        header
    }

    fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            brand: [bytes[0], bytes[1], bytes[2], bytes[3]],
            major_version: u16::from_be_bytes([bytes[4], bytes[5]]),
            minor_version: u16::from_be_bytes([bytes[6], bytes[7]]),
        }
    }

    fn of<'a, T: ProtocolObjectInner<'a>>() -> Self {
        let (major_version, minor_version) = T::version();
        Self {
            brand: T::brand(),
            major_version,
            minor_version,
        }
    }
}

/// Errors when reading a protocol object from bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeserializationError {
    /// The bytestring cannot even hold a header.
    #[error("bytestring too short: expected {expected} bytes, got {received}")]
    TooShort {
        /// Minimal acceptable length.
        expected: usize,
        /// Actual length.
        received: usize,
    },
    /// The object tag belongs to another type.
    #[error("incorrect header: expected {expected:?}, got {received:?}")]
    IncorrectHeader {
        /// Brand of the requested type.
        expected: [u8; 4],
        /// Brand found in the bytestring.
        received: [u8; 4],
    },
    /// Incompatible major version.
    #[error("differing major version: expected {expected}, got {received}")]
    MajorVersionMismatch {
        /// Supported major version.
        expected: u16,
        /// Major version found in the bytestring.
        received: u16,
    },
    /// The object was produced by a newer implementation.
    #[error("unsupported minor version: expected <={expected}, got {received}")]
    UnsupportedMinorVersion {
        /// Highest supported minor version.
        expected: u16,
        /// Minor version found in the bytestring.
        received: u16,
    },
    /// The header is fine, but the payload is not.
    #[error("payload deserialization failed: {error_msg}")]
    BadPayload {
        /// Error reported by the payload decoder.
        error_msg: String,
    },
}

// The "private" part of `ProtocolObject` allowing one to modify implementation
// without incurring backward incompatible API change.
// The module is not exported, so external crates can name this trait
// only through `ProtocolObject`.
pub trait ProtocolObjectInner<'a>: Serialize + Deserialize<'a> {
    /// Returns the major and the minor version of the object.
    ///
    /// It must be possible to deserialize an object with version X.Y
    /// in the code where the declared version is X.Z, as long as Z >= Y.
    fn version() -> (u16, u16);

    /// A unique object tag.
    fn brand() -> [u8; 4];

    fn unversioned_to_bytes(&self) -> Box<[u8]> {
        messagepack_serialize(self)
    }

    /// Returns `None` if the given minor version is not handled by the type.
    fn unversioned_from_bytes(minor_version: u16, bytes: &'a [u8]) -> Option<Result<Self, String>> {
        if minor_version == 0 {
            Some(messagepack_deserialize(bytes))
        } else {
            None
        }
    }
}

/// This is a versioned protocol object.
pub trait ProtocolObject<'a>: ProtocolObjectInner<'a> {
    /// The version of the object as a tuple `(major, minor)`
    /// supported by the current implementation.
    fn version() -> (u16, u16) {
        <Self as ProtocolObjectInner>::version()
    }

    /// Serializes the object.
    fn to_bytes(&self) -> Box<[u8]> {
        let header = ProtocolObjectHeader::of::<Self>().to_bytes();
        let payload = self.unversioned_to_bytes();
        [header.as_slice(), payload.as_ref()].concat().into_boxed_slice()
    }

    /// Attempts to deserialize the object.
    fn from_bytes(bytes: &'a [u8]) -> Result<Self, DeserializationError> {
        let header_bytes: &[u8; HEADER_SIZE] = bytes
            .get(..HEADER_SIZE)
            .and_then(|slice| slice.try_into().ok())
            .ok_or(DeserializationError::TooShort {
                expected: HEADER_SIZE,
                received: bytes.len(),
            })?;
        let header = ProtocolObjectHeader::from_bytes(header_bytes);
        let reference = ProtocolObjectHeader::of::<Self>();

        if header.brand != reference.brand {
            return Err(DeserializationError::IncorrectHeader {
                expected: reference.brand,
                received: header.brand,
            });
        }

        if header.major_version != reference.major_version {
            return Err(DeserializationError::MajorVersionMismatch {
                expected: reference.major_version,
                received: header.major_version,
            });
        }

        // A type must handle every minor version up to its own,
        // so `None` can only mean the object is from the future.
        Self::unversioned_from_bytes(header.minor_version, &bytes[HEADER_SIZE..])
            .filter(|_| header.minor_version <= reference.minor_version)
            .ok_or(DeserializationError::UnsupportedMinorVersion {
                expected: reference.minor_version,
                received: header.minor_version,
            })?
            .map_err(|error_msg| DeserializationError::BadPayload { error_msg })
    }
}
