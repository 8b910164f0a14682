//! Core of a Telos EVM chain-indexing pipeline: a state-history
//! streaming reader, a per-block assembler that reconstructs EVM
//! transaction sets from native action traces, and an ordered consumer
//! pipeline feeding a document store and a live head broadcast.

pub mod abi;
pub mod assembler;
pub mod block;
pub mod broadcast;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod hasher;
pub mod pool;
pub mod queue;
pub mod server;
pub mod ship;
pub mod sink;
pub mod state;
pub mod store;
