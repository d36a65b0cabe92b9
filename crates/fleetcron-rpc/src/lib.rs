//! Worker-to-coordinator RPC.
//!
//! This crate provides:
//! - HMAC session digests with a clock-skew window
//! - The [`TaskChannel`] trait workers pull work through
//! - [`RemoteChannel`], its HTTP implementation

pub mod auth;
pub mod channel;
pub mod client;
pub mod error;

pub use auth::SessionSigner;
pub use channel::{TaskChannel, RPC_PATH};
pub use client::RemoteChannel;
pub use error::{RpcError, RpcResult};
