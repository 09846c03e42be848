//! Cisco Secure Firewall Management Center backend
//!
//! - [`client`]: authenticated REST client implementing the manager traits
//! - [`wire`]: JSON payloads and their conversion into core types

pub mod client;
pub mod wire;

pub use client::{ClientConfig, FmcClient};
