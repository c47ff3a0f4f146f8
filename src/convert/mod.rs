//! Protocol converters: dialect ↔ canonical mappings, tool normalization,
//! message canonicalization, and the upstream payload builder.

pub mod anthropic;
pub mod gemini;
pub mod messages;
pub mod model_map;
pub mod openai;
pub mod request;
pub mod tools;
