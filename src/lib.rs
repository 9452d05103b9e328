//! Chunked file upload service: a receiver that reassembles files uploaded
//! in independent chunks, and a sender that drives it.

pub mod common;
pub mod send;
pub mod server;
pub mod transfer;
pub mod utils;
