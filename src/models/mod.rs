//! Wire types for the three client dialects, the canonical internal shape,
//! and the upstream payload.

pub mod anthropic;
pub mod canonical;
pub mod gemini;
pub mod kiro;
pub mod openai;
