#![cfg_attr(not(test), forbid(unsafe_code))]

//! Types shared between the Feira chat server and its clients: configuration,
//! wire models, realtime envelopes and client-side reconcilers.

pub mod config;
pub mod models;
pub mod realtime;
