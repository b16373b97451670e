//! Wire types for the OpenAI-compatible HTTP surface.

pub mod v1;
