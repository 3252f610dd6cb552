//! Muninn - Thread-safe prefix-matching prompt cache for LLM inference
//!
//! Inference servers pay a large cost to build model state (typically a
//! KV cache) for a prompt. Muninn keeps that state around, keyed by model
//! namespace and token sequence, and serves later prompts from the
//! longest usable stored prefix so only the new tail has to be computed.
//! With [`TrimHooks`] configured it can also serve a query from state
//! stored under a longer sequence, trimming a copy down to the shared
//! prefix.
//!
//! # Example
//!
//! ```rust
//! use muninn::{CacheConfig, PromptCache};
//!
//! fn main() -> muninn::Result<()> {
//!     let cache = PromptCache::new(&CacheConfig::new().max_entries(256))?;
//!
//!     // The first request computes its state from scratch, then caches
//!     // it for the sequence it covers.
//!     let prompt = [1019, 2158, 2003, 1996];
//!     let (state, remaining) = cache.fetch("llama-3-8b", &prompt);
//!     assert!(state.is_none());
//!     assert_eq!(remaining, prompt);
//!     cache.insert("llama-3-8b", &prompt, vec![0.25_f32; 16]);
//!
//!     // A follow-up sharing the prefix only has to run the tail.
//!     let longer = [1019, 2158, 2003, 1996, 3007];
//!     let (state, remaining) = cache.fetch("llama-3-8b", &longer);
//!     assert!(state.is_some());
//!     assert_eq!(remaining, vec![3007]);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;
pub mod telemetry;

// Re-export main types at crate root
pub use cache::{CacheConfig, PromptCache, Token, TrimHooks};
pub use error::{MuninnError, Result};
