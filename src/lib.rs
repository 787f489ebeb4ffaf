//! # campaign-dispatch
//!
//! Backend library that delivers personalised messages for a campaign to its
//! recipients through a rate-limited, retrying HTTP delivery API.
//!
//! ## Design Philosophy
//!
//! campaign-dispatch is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Controllable** - Runs can be paused, resumed and stopped at any time
//! - **Observable** - Live progress, a drainable event queue, a broadcast
//!   stream and a durable event log
//! - **Restartable** - Only pending recipients are sent on the next run
//!
//! ## Quick Start
//!
//! ```no_run
//! use campaign_dispatch::{Config, Database, Dispatcher, HttpTransport};
//! use campaign_dispatch::types::CampaignSettings;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let db = Arc::new(Database::new(&config.persistence.database_path).await?);
//!     let transport = Arc::new(HttpTransport::new(&config)?);
//!
//!     let settings = CampaignSettings::new("Hello {{name}}", "<p>Hi {{name}}</p>");
//!     let campaign = db.insert_campaign("Spring launch", &settings).await?;
//!
//!     let dispatcher = Dispatcher::new(config, db);
//!
//!     // Subscribe to events
//!     let mut events = dispatcher.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok((campaign_id, event)) = events.recv().await {
//!             println!("{}: {}", campaign_id, event.message);
//!         }
//!     });
//!
//!     dispatcher.start(campaign, settings, transport).await?;
//!     dispatcher.wait_for_completion(campaign).await;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Name-based attachment lookup
pub mod attachment_index;
/// Configuration types
pub mod config;
/// Campaign execution engine (decomposed into focused submodules)
pub mod dispatcher;
/// Error types
pub mod error;
/// Retry logic with exponential backoff
pub mod retry;
/// Database persistence layer
pub mod store;
/// Jinja-style templates
pub mod template;
/// Delivery transports
pub mod transport;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use dispatcher::{DispatchEvent, Dispatcher};
pub use error::{DatabaseError, DispatchError, Error, Result, TransportError};
pub use store::{CampaignStore, Database, NewRecipient};
pub use transport::{DeliveryTransport, HttpTransport, SendRequest};
pub use types::{
    CampaignEvent, CampaignId, CampaignSettings, EventLevel, RunStatus, RunStatusReport,
    SendOutcome,
};
