//! # satchel-esplora
//! [`ChainProvider`](satchel_core::traits::ChainProvider) implementation over
//! the Esplora REST API, as served by Blockstream Esplora and mempool.space.
//!
//! Calls are blocking and bounded by the configured timeout.

pub mod client;
pub mod config;
pub mod model;

pub use client::EsploraClient;
pub use config::ProviderConfig;
