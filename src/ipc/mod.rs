//! IPC module for browser client and UI communication

mod protocol;
mod server;

pub use server::{ClientLinks, Server};
