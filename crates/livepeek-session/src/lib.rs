//! livepeek-session — drives one capture session against a backend.
//!
//! # State machine
//!
//! ```text
//!            start()                     stop()
//!   Idle ──────────────► Running ─────────────────► Stopping ──► Idle
//!    ▲                     │  stream error / open failure
//!    │                     ▼
//!    └──── stop() ──── Failed ◄──── refresh tick restarts capture
//! ```
//!
//! All session state lives in one actor task. The [`CaptureSession`] handle
//! sends it commands; state is published through a `watch` snapshot and a
//! `broadcast` stream of [`SessionEvent`]s.

pub mod events;
pub mod filter;
pub mod selection;
pub mod session;

pub use events::{SessionEvent, SessionSnapshot};
pub use selection::Selection;
pub use session::{CaptureSession, SessionBuilder};
