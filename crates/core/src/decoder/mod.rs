//! Streaming decoder for transcript payloads.
//!
//! Turns a byte stream into a lazy sequence of JSON elements without
//! materializing the payload. Two framings are supported:
//! - a top-level JSON array, decoded as each element completes
//! - newline-delimited JSON, decoded line by line
//!
//! Memory is bounded by one element (plus the chunk being fed), independent
//! of the total stream size. An element that fails to parse, or exceeds the
//! configured size limit, yields an element-level error and decoding resumes
//! with the next element. A broken array structure is terminal.
//!
//! # Example
//!
//! ```ignore
//! use parley_core::decoder::{DecoderConfig, Framing, RecordDecoder};
//!
//! let mut decoder = RecordDecoder::new(Framing::Auto, &DecoderConfig::default());
//! decoder.push(b"{\"conversation_id\":\"c1\",\"text\":\"hi\"}\n");
//! decoder.finish();
//! while let Some(item) = decoder.next() {
//!     println!("{:?}", item);
//! }
//! ```

mod config;
mod incremental;
mod stream;
mod types;

pub use config::DecoderConfig;
pub use incremental::RecordDecoder;
pub use stream::RecordStream;
pub use types::{DecodeError, DecodedElement, DecoderPosition, Framing};
