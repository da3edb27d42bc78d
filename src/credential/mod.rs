//! Session credential acquisition
//!
//! A credential is the signed WebSocket URL for one conversation attempt.
//! Fetching is a single request with no retry; callers decide whether to try
//! again.

mod fetcher;

pub use fetcher::{CredentialFetcher, HttpCredentialFetcher, SessionCredential, StaticCredential};
