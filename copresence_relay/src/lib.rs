// copresence_relay — dual-channel relay server and client sync engine.
//
// The relay is a thin message broker for co-present clients: a reliable TCP
// channel carries text and application events with per-session / per-user
// targeting, and an unreliable UDP channel fans out high-frequency pose
// updates. The relay never interprets payloads; application semantics stay
// on the clients.
//
// Module overview:
// - `registry.rs`:  `ConnectionRegistry`, the only cross-thread shared
//                   mutable state: user → reliable handle, user → learned
//                   UDP address.
// - `router.rs`:    `MessageRouter`: sender exclusion, session/user
//                   filtering, authoritative re-stamping, fan-out.
// - `server.rs`:    Accept loop, per-connection receive loops, and the UDP
//                   relay loop. `start_relay` / `RelayHandle`.
// - `client.rs`:    `SyncClient`, the client-side engine: dual-channel
//                   connect, identity handshake, periodic pose broadcast,
//                   pose store.
// - `reconcile.rs`: Blending received poses into local slots (indexed and
//                   encounter-order strategies).
// - `config.rs`:    URL-like endpoint parsing and the JSON-loadable server
//                   and client configs.
// - `error.rs`:     `RelayError` taxonomy.
//
// Dependencies: `copresence_protocol` (message types, codec, framing).
// Blocking std::net I/O with thread-per-connection, no async runtime.
//
// The relay runs standalone (`main.rs`, binary `relay`) or embedded via
// `start_relay`.

pub mod client;
pub mod config;
pub mod error;
pub mod reconcile;
pub mod registry;
pub mod router;
pub mod server;

pub use client::SyncClient;
pub use config::{RelayConfig, SyncConfig};
pub use error::{RelayError, Result};
pub use server::{RelayHandle, start_relay};
