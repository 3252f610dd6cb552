//! Prompt caching subsystem.
//!
//! - [`PromptCache`] — namespace-partitioned store for computed model
//!   state, looked up by token-sequence prefix. Uniquely held entries are
//!   handed out by move and re-inserted by the caller once advanced;
//!   shared entries are cloned out. A single LRU order across all
//!   namespaces bounds the total entry count.
//!
//! - [`TrimHooks`] — optional callbacks that let the cache serve a query
//!   from state stored under a longer sequence by trimming a copy down
//!   to the shared prefix.
//!
//! Entries live in one token trie per namespace (internal `trie`
//! module); see [`prompt`] for the locking and ownership rules.

pub mod prompt;

mod trie;

pub use prompt::{CacheConfig, PromptCache, TrimHooks};

/// Token id as produced by a tokenizer.
pub type Token = u32;
