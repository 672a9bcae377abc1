//! Cryptographic primitives used to protect the token cache at rest.

pub mod encryption;

pub use encryption::{CryptoBox, CryptoError, EncryptedData};
