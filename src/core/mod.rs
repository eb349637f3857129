//! # Core Framing Components
//!
//! Newline-delimited framing over arbitrary byte streams.
//!
//! ## Components
//! - **Codec**: Tokio codec splitting a stream on `\n`
//! - **Line Reader**: Buffered frame reader with a data-ready notification
//!
//! ## Wire Format
//! ```text
//! [Frame bytes (N)] [0x0A]
//! ```
//!
//! ## Security
//! - Unterminated frames are bounded (16MB default) to prevent memory exhaustion
//! - Trailing bytes without a delimiter are never delivered

pub mod codec;
pub mod line_reader;
