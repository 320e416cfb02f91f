//! cot-proxy: reverse proxy that rewrites chat-completion traffic per model variant
//!
//! Features:
//! - Variant selection from the client-supplied model identifier (`model@label`
//!   suffix or configured regex)
//! - Request rewriting: system-prompt prepend, weak defaults, weak logit bias,
//!   end-of-prompt injection
//! - Think-tag removal from responses, buffered or streamed
//! - Pass-through proxying for everything else

pub mod config;
pub mod proxy;
pub mod rewrite;
pub mod strip;
pub mod variants;

pub use config::AppConfig;
pub use proxy::run_server;
pub use variants::{ResolvedModel, VariantRegistry};
