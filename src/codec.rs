//! Application service payload codec (collaborator surface, §6).
//!
//! The core never introspects the application's request/response types; it
//! calls `encode`/`decode`/`claims` on whatever implements [`ServiceCodec`]
//! and moves the resulting bytes. [`CborServiceCodec`] is a bundled demo
//! implementation so the crate is runnable and testable end-to-end without
//! an external application plugging one in — it is a reference fixture,
//! not a normative part of the protocol.

use serde::{de::DeserializeOwned, Serialize};

/// What an inbound frame's service payload decoded to.
pub enum ServiceMessage<Req, Resp> {
    Request(Req),
    Response(Resp),
    /// An application-level exception, distinct from a `CommandStatus`
    /// protocol failure — carried as opaque bytes the application decodes.
    Exception(Vec<u8>),
}

/// Capability object for encoding/decoding application payloads. The core
/// is generic over this trait; it never matches on `Req`/`Resp` itself.
pub trait ServiceCodec: Send + Sync + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    fn encode_request(&self, request: &Self::Request) -> Result<Vec<u8>, Self::Error>;
    fn decode_request(&self, bytes: &[u8]) -> Result<Self::Request, Self::Error>;
    fn encode_response(&self, response: &Self::Response) -> Result<Vec<u8>, Self::Error>;
    fn decode_response(&self, bytes: &[u8]) -> Result<Self::Response, Self::Error>;

    /// Whether a given exchange's request is idempotent (§3's `Command.idempotent`).
    /// Defaults to `false`: the safer default when the application hasn't said otherwise.
    fn claims_idempotent(&self, _request: &Self::Request) -> bool {
        false
    }
}

/// Demo `ServiceCodec` built on `ciborium` CBOR encoding. Used by the
/// reference binary and the integration tests.
#[derive(Debug, Clone, Default)]
pub struct CborServiceCodec<Req, Resp> {
    _marker: std::marker::PhantomData<(Req, Resp)>,
}

impl<Req, Resp> CborServiceCodec<Req, Resp> {
    pub fn new() -> Self {
        Self { _marker: std::marker::PhantomData }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CborCodecError {
    #[error("cbor encode error: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),
    #[error("cbor decode error: {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),
}

impl<Req, Resp> ServiceCodec for CborServiceCodec<Req, Resp>
where
    Req: Serialize + DeserializeOwned + Send + 'static,
    Resp: Serialize + DeserializeOwned + Send + 'static,
{
    type Request = Req;
    type Response = Resp;
    type Error = CborCodecError;

    fn encode_request(&self, request: &Req) -> Result<Vec<u8>, Self::Error> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(request, &mut buf)?;
        Ok(buf)
    }

    fn decode_request(&self, bytes: &[u8]) -> Result<Req, Self::Error> {
        Ok(ciborium::de::from_reader(bytes)?)
    }

    fn encode_response(&self, response: &Resp) -> Result<Vec<u8>, Self::Error> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(response, &mut buf)?;
        Ok(buf)
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<Resp, Self::Error> {
        Ok(ciborium::de::from_reader(bytes)?)
    }
}

/// Demo `ServiceCodec` built on `serde_json`. Trades CBOR's compactness for
/// human-readable payloads — handy when a transport is being inspected with
/// a packet sniffer during development.
#[derive(Debug, Clone, Default)]
pub struct JsonServiceCodec<Req, Resp> {
    _marker: std::marker::PhantomData<(Req, Resp)>,
}

impl<Req, Resp> JsonServiceCodec<Req, Resp> {
    pub fn new() -> Self {
        Self { _marker: std::marker::PhantomData }
    }
}

impl<Req, Resp> ServiceCodec for JsonServiceCodec<Req, Resp>
where
    Req: Serialize + DeserializeOwned + Send + 'static,
    Resp: Serialize + DeserializeOwned + Send + 'static,
{
    type Request = Req;
    type Response = Resp;
    type Error = serde_json::Error;

    fn encode_request(&self, request: &Req) -> Result<Vec<u8>, Self::Error> {
        serde_json::to_vec(request)
    }

    fn decode_request(&self, bytes: &[u8]) -> Result<Req, Self::Error> {
        serde_json::from_slice(bytes)
    }

    fn encode_response(&self, response: &Resp) -> Result<Vec<u8>, Self::Error> {
        serde_json::to_vec(response)
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<Resp, Self::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        nonce: u64,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Pong {
        nonce: u64,
    }

    #[test]
    fn round_trips_request_and_response() {
        let codec: CborServiceCodec<Ping, Pong> = CborServiceCodec::new();
        let req = Ping { nonce: 42 };
        let bytes = codec.encode_request(&req).unwrap();
        assert_eq!(codec.decode_request(&bytes).unwrap(), req);

        let resp = Pong { nonce: 42 };
        let bytes = codec.encode_response(&resp).unwrap();
        assert_eq!(codec.decode_response(&bytes).unwrap(), resp);
    }

    #[test]
    fn default_idempotence_claim_is_false() {
        let codec: CborServiceCodec<Ping, Pong> = CborServiceCodec::new();
        assert!(!codec.claims_idempotent(&Ping { nonce: 1 }));
    }

    #[test]
    fn json_codec_round_trips_request_and_response() {
        let codec: JsonServiceCodec<Ping, Pong> = JsonServiceCodec::new();
        let req = Ping { nonce: 7 };
        let bytes = codec.encode_request(&req).unwrap();
        assert_eq!(codec.decode_request(&bytes).unwrap(), req);

        let resp = Pong { nonce: 7 };
        let bytes = codec.encode_response(&resp).unwrap();
        assert_eq!(codec.decode_response(&bytes).unwrap(), resp);
    }
}
