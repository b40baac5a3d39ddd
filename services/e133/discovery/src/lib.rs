//! SLP-based E1.33 device discovery.
//!
//! Devices advertise themselves as `service:e133.esta` SLP services. Discovery
//! runs blocking UDP I/O, so it lives on its own OS thread ([`DiscoveryThread`])
//! and hands each round's URL list back to the async side over a channel.
//!
//! ## Example
//!
//! ```rust,no_run
//! use e133_discovery::{parse_slp_url, DiscoveryThread, SlpAgent, SlpConfig};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> Result<(), e133_discovery::DiscoveryError> {
//! let (tx, mut rx) = mpsc::unbounded_channel();
//! let mut thread = DiscoveryThread::new(Box::new(SlpAgent::new(SlpConfig::default())), tx);
//! thread.init()?;
//! thread.start()?;
//! thread.discover();
//!
//! if let Some(Ok(urls)) = rx.recv().await {
//!     for url in urls {
//!         if let Ok((uid, ip)) = parse_slp_url(&url) {
//!             println!("{} at {}", uid, ip);
//!         }
//!     }
//! }
//! thread.join();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod slp;
pub mod thread;
pub mod url;

pub use error::{DiscoveryError, UrlParseError};
pub use slp::{SlpAgent, SlpConfig, E133_SERVICE_TYPE, SLP_DEFAULT_SCOPE, SLP_MULTICAST_ADDR};
pub use thread::{DiscoveryAgent, DiscoveryResult, DiscoveryThread};
pub use url::parse_slp_url;
