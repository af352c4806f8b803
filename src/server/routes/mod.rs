//! HTTP route handlers

pub mod chat;
pub mod connect;
pub mod gateway;
