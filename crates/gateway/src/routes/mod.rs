//! Route handlers binding C3–C9 behind the HTTP surface (spec §6).

pub mod admin;
pub mod auth;
pub mod chat;
pub mod chatflows;
pub mod health;
