// Copyright 2026 Grokline Contributors
// SPDX-License-Identifier: Apache-2.0

//! Grokline: a client for the Grok web chat.
//!
//! A turn runs in three stages:
//!
//! 1. **Bootstrap** ([`bootstrap`]): load the landing page, register a
//!    keypair, answer the challenge and collect verification material.
//! 2. **Signing** ([`signature`]): derive the per-request `x-statsig-id`
//!    header from that material and the constants scanned out of the
//!    script bundles ([`intelligence`]).
//! 3. **Conversation** ([`conversation`]): post the message and parse the
//!    NDJSON reply, buffered or streamed, into a result and a
//!    [`ContinuationToken`] for the next turn.
//!
//! ```no_run
//! # async fn demo() -> grokline::GrokResult<()> {
//! let mut client = grokline::Client::new("grok-3-auto", None)?;
//! let first = client.send_message("Hello", None).await?;
//! let second = client
//!     .send_message("And again", Some(&first.continuation))
//!     .await?;
//! println!("{}", second.response);
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod headers;
pub mod intelligence;
pub mod signature;
pub mod solver;
pub mod transport;
pub mod types;
pub mod util;

pub use client::Client;
pub use config::{ClientConfig, ModelSpec, RetryPolicy};
pub use error::{ErrorKind, GrokError, GrokResult, Phase};
pub use intelligence::{SiteIntelligence, SiteIntelligenceCache};
pub use types::{ChatResult, ContinuationToken, StreamFrame};
