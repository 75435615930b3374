#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # buffer-swapper: buffer ownership handoff for compositors
//!
//! A client draws frames into buffers it does not own, the compositor displays them. This crate
//! arbitrates who may touch which buffer at any point in time.
//!
//! ## Structure of the crate
//!
//! - [`backend::allocator`] contains the [`Buffer`](backend::allocator::Buffer) and
//!   [`Allocator`](backend::allocator::Allocator) abstractions, together with a simple
//!   system memory allocator.
//! - [`backend::swapper`] contains the swapping strategies, the director switching between them
//!   and scoped handles returning buffers automatically.
//! - [`utils`] contains small geometry helpers.
//!
//! ## Threading
//!
//! Every swapper is meant to be shared between a client thread and a compositor thread behind an
//! [`Arc`](std::sync::Arc). All operations take `&self`. Only the queueing strategy ever blocks,
//! and only inside `client_acquire`.
//!
//! ## Logging
//!
//! This crate makes use of [`tracing`] for its internal logging. Every swapper owns a span,
//! operations are traced at `trace` level, strategy switches and shutdowns at `debug` and `info`.
//!
//! For release builds it is recommended to limit the log level during compile time, for example:
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```

pub mod backend;
pub mod utils;
