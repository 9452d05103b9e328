//! Sender: split local files into chunks and push them to an upload server.

pub mod client;
mod reader;

pub use client::{SendOptions, UploadClient};
pub use reader::ChunkReader;
