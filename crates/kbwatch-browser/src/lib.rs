//! Chromium-backed [`BrowserSession`](kbwatch_core::BrowserSession).
//!
//! Drives a real Chromium over the DevTools protocol via `chromiumoxide`.
//! Element handles handed to the engine are indices into a per-session arena
//! that is dropped whenever the document may have been replaced.

pub mod arena;
pub mod launch;
pub mod session;

pub use arena::HandleArena;
pub use launch::{launch, LaunchError, LaunchOptions};
pub use session::ChromiumSession;
