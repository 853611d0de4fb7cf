//! Encode/decode pairs for queue items.
//!
//! The queue never looks inside a payload: whatever bytes `encode` produces
//! are delivered to `decode` in the reading process, exactly.

use std::convert::Infallible;
use std::marker::PhantomData;

use facet::Facet;

/// Turns items into bytes and back.
///
/// Implementations must be pure: `decode(encode(x))` yields a value equal to
/// `x`, in any process.
pub trait Codec<T>: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn encode(&self, value: &T) -> Result<Vec<u8>, Self::Error>;

    fn decode(&self, bytes: &[u8]) -> Result<T, Self::Error>;
}

/// Postcard binary encoding for any [`Facet`] type. This is the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct Postcard;

impl<T> Codec<T> for Postcard
where
    T: for<'a> Facet<'a>,
{
    type Error = PostcardError;

    fn encode(&self, value: &T) -> Result<Vec<u8>, PostcardError> {
        facet_postcard::to_vec(value).map_err(|e| PostcardError::Serialize(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, PostcardError> {
        facet_postcard::from_slice(bytes).map_err(|e| PostcardError::Deserialize(e.to_string()))
    }
}

/// Errors from the [`Postcard`] codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostcardError {
    Serialize(String),
    Deserialize(String),
}

impl std::fmt::Display for PostcardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialize(e) => write!(f, "failed to serialize to postcard: {}", e),
            Self::Deserialize(e) => write!(f, "failed to deserialize from postcard: {}", e),
        }
    }
}

impl std::error::Error for PostcardError {}

/// Byte payloads passed through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Raw;

impl Codec<Vec<u8>> for Raw {
    type Error = Infallible;

    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>, Infallible> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, Infallible> {
        Ok(bytes.to_vec())
    }
}

/// A codec made of two functions.
///
/// ```
/// use spool::codec::{Codec, FnCodec};
///
/// let codec = FnCodec::new(
///     |s: &String| Ok::<_, std::string::FromUtf8Error>(s.clone().into_bytes()),
///     |b: &[u8]| String::from_utf8(b.to_vec()),
/// );
/// let bytes = Codec::<String>::encode(&codec, &"hi".to_string()).unwrap();
/// assert_eq!(Codec::<String>::decode(&codec, &bytes).unwrap(), "hi");
/// ```
pub struct FnCodec<E, D, Err> {
    encode: E,
    decode: D,
    _error: PhantomData<fn() -> Err>,
}

impl<E, D, Err> FnCodec<E, D, Err> {
    pub fn new<T>(encode: E, decode: D) -> Self
    where
        E: Fn(&T) -> Result<Vec<u8>, Err>,
        D: Fn(&[u8]) -> Result<T, Err>,
    {
        Self {
            encode,
            decode,
            _error: PhantomData,
        }
    }
}

impl<E, D, Err> std::fmt::Debug for FnCodec<E, D, Err> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCodec").finish_non_exhaustive()
    }
}

impl<T, E, D, Err> Codec<T> for FnCodec<E, D, Err>
where
    E: Fn(&T) -> Result<Vec<u8>, Err> + Send + Sync + 'static,
    D: Fn(&[u8]) -> Result<T, Err> + Send + Sync + 'static,
    Err: std::error::Error + Send + Sync + 'static,
{
    type Error = Err;

    fn encode(&self, value: &T) -> Result<Vec<u8>, Err> {
        (self.encode)(value)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, Err> {
        (self.decode)(bytes)
    }
}
