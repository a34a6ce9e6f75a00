use crate::codec::Codec;
use crate::error::{CResult, Error};
use serde::{de, Serialize};

/// JSON codec used for WAL entries and message bodies.
#[derive(Clone, Copy, Default)]
pub struct JsonCodec {}

impl JsonCodec {
    pub fn new() -> Self {
        JsonCodec {}
    }

    pub fn encode<T>(&self, value: &T) -> CResult<Vec<u8>>
    where
        T: ?Sized + Serialize,
    {
        serde_json::to_vec(value).map_err(|e| Error::Internal(e.to_string()))
    }

    pub fn decode<R>(&self, bytes: &[u8]) -> CResult<R>
    where
        R: for<'a> de::Deserialize<'a>,
    {
        serde_json::from_slice(bytes).map_err(|e| Error::Parse(e.to_string()))
    }
}

impl Codec for JsonCodec {
    fn codec_name(&self) -> &'static str {
        "JsonCodec"
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_derive::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Person {
        name: String,
        age: i16,
    }

    #[test]
    fn round_trips() {
        let codec = JsonCodec::new();
        let p = Person { name: "ada".into(), age: 30 };
        let encoded = codec.encode(&p).unwrap();
        let decoded: Person = codec.decode(&encoded).unwrap();
        assert_eq!(p, decoded);
    }

    #[test]
    fn decode_error_is_parse_error() {
        let codec = JsonCodec::new();
        let result: CResult<Person> = codec.decode(b"not json");
        assert!(matches!(result, Err(Error::Parse(_))));
    }
}
