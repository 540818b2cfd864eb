//! Protocol module - wire primitives and frame I/O.
//!
//! This module implements the binary building blocks shared by the client
//! and server side of the channel:
//! - Length-prefixed UTF-8 string encoding with a null sentinel
//! - Big-endian fixed-width integers
//! - Blocking length-prefixed frame reads/writes over a socket

mod wire;

pub use wire::{
    put_string, read_frame, write_close_frame, write_frame, DecodeError, Reader, FRAME_HEADER_SIZE,
};
