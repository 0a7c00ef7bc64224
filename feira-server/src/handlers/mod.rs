//! Request handlers for the `/api` surface.
pub mod chat;
pub mod realtime;
