//! # collsync-renderer
//!
//! Tera-based rendering of sync reports and notification bodies.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use collsync_renderer::Renderer;
//! use collsync_sync::SyncReport;
//!
//! fn print_report(report: &SyncReport) {
//!     if let Ok(renderer) = Renderer::new() {
//!         if let Ok(text) = renderer.render_report(report, chrono::Utc::now()) {
//!             println!("{text}");
//!         }
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::ReportContext;
pub use engine::{NotificationKind, Renderer, TemplateEngine};
pub use error::RenderError;
