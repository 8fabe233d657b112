//! netfeed batch sinks
//!
//! - [`RestSink`]: bulk inserts into a PostgREST/Supabase table
//! - [`JsonlSink`]: JSON lines to stdout or a file
//! - [`DryRunSink`]: logs what would be sent

pub mod dry_run;
pub mod jsonl;
pub mod rest;

pub use dry_run::DryRunSink;
pub use jsonl::JsonlSink;
pub use rest::{RestSink, RestSinkConfig};
