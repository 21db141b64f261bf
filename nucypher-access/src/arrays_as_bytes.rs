// Serializes fixed-size byte arrays (`[u8; N]`) as bytestrings in binary formats
// and as hex strings in human-readable ones.
// By default `serde` writes arrays as tuples of integers, which in MessagePack
// prepends every value >127 with `\xcc`.

use core::fmt;

use serde::{de, Deserializer, Serializer};

pub(crate) fn serialize<S, const N: usize>(obj: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if serializer.is_human_readable() {
        serializer.serialize_str(&hex::encode(obj))
    } else {
        serializer.serialize_bytes(obj)
    }
}

struct ArrayVisitor<const N: usize>;

impl<'de, const N: usize> de::Visitor<'de> for ArrayVisitor<N> {
    type Value = [u8; N];

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a byte array of length {N} or its hex representation")
    }

    fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        v.try_into()
            .map_err(|_| E::invalid_length(v.len(), &self))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        let bytes = hex::decode(v.trim_start_matches("0x")).map_err(E::custom)?;
        self.visit_bytes(&bytes)
    }
}

pub(crate) fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
where
    D: Deserializer<'de>,
{
    if deserializer.is_human_readable() {
        deserializer.deserialize_str(ArrayVisitor::<N>)
    } else {
        deserializer.deserialize_bytes(ArrayVisitor::<N>)
    }
}

/// The same encoding for variable-length `Box<[u8]>` payloads.
pub(crate) mod boxed {
    use serde::{de, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    struct BoxVisitor;

    impl<'de> de::Visitor<'de> for BoxVisitor {
        type Value = Box<[u8]>;

        fn expecting(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            write!(f, "a bytestring or its hex representation")
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            Ok(v.into())
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
            Ok(v.into_boxed_slice())
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            hex::decode(v.trim_start_matches("0x"))
                .map(Vec::into_boxed_slice)
                .map_err(E::custom)
        }
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Box<[u8]>, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(BoxVisitor)
        } else {
            deserializer.deserialize_byte_buf(BoxVisitor)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Digest(#[serde(with = "crate::arrays_as_bytes")] [u8; 4]);

    #[test]
    fn binary_is_a_bytestring() {
        let digest = Digest([0xde, 0xad, 0xbe, 0xef]);
        let packed = rmp_serde::to_vec(&digest).unwrap();
        // bin8 marker, length, payload
        assert_eq!(packed, [0xc4, 4, 0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(rmp_serde::from_slice::<Digest>(&packed).unwrap(), digest);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Blob(#[serde(with = "crate::arrays_as_bytes::boxed")] Box<[u8]>);

    #[test]
    fn boxed_payload() {
        let blob = Blob(Box::new([1, 2, 3]));
        let packed = rmp_serde::to_vec(&blob).unwrap();
        assert_eq!(packed, [0xc4, 3, 1, 2, 3]);
        assert_eq!(rmp_serde::from_slice::<Blob>(&packed).unwrap(), blob);
        assert_eq!(serde_json::to_string(&blob).unwrap(), "\"010203\"");
    }

    #[test]
    fn text_is_hex() {
        let digest = Digest([0xde, 0xad, 0xbe, 0xef]);
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, "\"deadbeef\"");
        assert_eq!(serde_json::from_str::<Digest>(&json).unwrap(), digest);
        assert_eq!(serde_json::from_str::<Digest>("\"0xdeadbeef\"").unwrap(), digest);
        assert!(serde_json::from_str::<Digest>("\"deadbe\"").is_err());
    }
}
