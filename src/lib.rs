//! MathML equation render cache
//!
//! Renders MathML fragments of documents open in a host editor to PNG and
//! serves them over HTTP.
//!
//! # Modules
//!
//! - `snapshot`: Per-document frozen copies of equation subtrees, keyed by handle
//! - `identity`: Node identity to handle mapping that does not retain nodes
//! - `normalize`: Repairs fragment markup before rendering
//! - `image_cache`: Content-addressed PNG store (disk plus in-memory LRU)
//! - `session`: Opaque per-document tokens that expire with the document
//! - `service`: Display and fetch flows tying the above together
//! - `routes`: axum router for the image fetch endpoint

pub mod config;
pub mod error;
pub mod identity;
pub mod image_cache;
pub mod normalize;
pub mod routes;
pub mod service;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod traits;

pub use config::Config;
pub use error::{AppError, EquationError, Result};
pub use identity::FragmentHandle;
pub use image_cache::{RenderedImage, RenderedImageCache};
pub use service::{EquationMarkup, EquationService, FetchOutcome};
pub use session::{DocumentSession, SessionRegistry, SessionToken};
pub use snapshot::FragmentSnapshotCache;
pub use state::AppState;
pub use traits::{DocumentController, Renderer};
