//! # bucketd server
//!
//! A networked token-bucket rate limiting service.
//!
//! Clients ask, for a (bucket-type, key) pair, whether an action is
//! permitted; the server decrements, refills, observes, or resets the
//! underlying counter atomically and answers over the same connection.
//! Bucket types are declared in a YAML config file and can be reloaded
//! while connections stay open.
//!
//! ## Wire protocol
//!
//! Length-prefixed frames over TCP: an unsigned LEB128 varint length
//! followed by that many payload bytes. The payload encoding is one of
//! two dialects, fixed per server instance:
//!
//! - `binary-schema` — MessagePack with named fields (the default)
//! - `tagged-json` — JSON with single-key variant wrappers
//!
//! Methods: `TAKE`, `PUT`, `WAIT`, `STATUS`, `RESET` (alias `ERASE`).
//! Responses correlate to requests by id; within one connection they
//! are written in request order.
//!
//! ## Quick start
//!
//! ```bash
//! # Serve the bucket types declared in bucketd.yml
//! bucketd --db /var/lib/bucketd/state.db --config-file bucketd.yml
//!
//! # Same, speaking JSON on a custom port
//! bucketd --db state.db --config-file bucketd.yml \
//!     --protocol tagged-json --port 9300
//! ```
//!
//! A minimal config file:
//!
//! ```yaml
//! buckets:
//!   ip:
//!     size: 10
//!     per_interval: 10
//!     interval: 1000
//!     overrides:
//!       - match: "10\\.0\\..*"
//!         size: 100
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  ┌────────────┐  ┌────────────┐
//! │  pipeline  │  │  pipeline  │  │  pipeline  │   one per connection
//! └─────┬──────┘  └─────┬──────┘  └─────┬──────┘
//!       │   frame + protocol codecs     │
//!       └───────────────┼───────────────┘
//!                 ┌─────▼─────┐
//!                 │  handler  │ ── registry snapshot
//!                 └─────┬─────┘
//!                 ┌─────▼─────┐
//!                 │store actor│   single writer
//!                 └─────┬─────┘
//!                 ┌─────▼─────┐
//!                 │  engine + │
//!                 │   store   │
//!                 └───────────┘
//! ```
//!
//! Each pipeline decodes frames, dispatches requests, and writes
//! responses serially; the store actor linearizes all bucket mutations.

pub mod actor;
pub mod config;
pub mod handler;
pub mod metrics;
pub mod pipeline;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod types;
