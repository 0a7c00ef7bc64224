#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(missing_docs)]

//! Realtime chat layer for the Feira marketplace: durable conversations and
//! messages, broadcast fan-out over server-sent events, presence and typing.

pub mod app_state;
pub mod auth;
pub mod db;
pub mod handlers;
pub mod http;
pub mod middleware;
pub mod openapi;
pub mod realtime;
pub mod routes;
pub mod server;
pub mod services;
pub mod store;
mod tracer;
