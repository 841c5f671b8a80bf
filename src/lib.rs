//! # thumbd
//!
//! A thumbnailing edge proxy. A client asks for a resized or cropped version
//! of an image; thumbd fetches the original from an origin server,
//! transforms it, and returns the result, while protecting itself from
//! hostile inputs, a wedged codec, and overload.
//!
//! # Architecture
//!
//! ```text
//! request ─► Director ─► origin fetch ─► Pool ─► Options::check ─► codec ─► response
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`imaging`] | Geometry + validation engine and the pure-Rust codec backend |
//! | [`pool`] | Admission-controlled worker pool with queue and processing deadlines |
//! | [`proxy`] | HTTP orchestrator: director, origin fetch, pool, response/status mapping |
//! | [`director`] | Query-string director used by the `thumbd` binary |
//! | [`config`] | `thumbd.toml` loading, validation and merging |
//!
//! # Design Decisions
//!
//! ## Validate Before Decode
//!
//! Origins are untrusted. [`imaging::Options::check`] runs on header
//! metadata only, re-checking the source's own dimensions and estimating the
//! decode buffer, so a decompression bomb is refused with `413` before a
//! single pixel is allocated.
//!
//! ## Integer Geometry
//!
//! Output sizes are computed with integer cross-multiplication and
//! round-half-up division ([`imaging::scale_aspect`]). The same request
//! yields the same pixels on every platform, and crop output is always
//! exactly the requested box.
//!
//! ## Fail Fast on a Wedged Worker
//!
//! A transform that overruns its processing deadline cannot be cancelled:
//! the codec has no interruption point and may have corrupted shared state.
//! The pool watches every admitted job, whether or not its caller is still
//! waiting, and hands [`pool::PoolError::ProcessingDeadlineExceeded`] to a
//! [`pool::FatalHandler`] that aborts the process. Restarting is the
//! supervisor's job.
//!
//! ## Bounded Queueing
//!
//! Excess requests wait for a worker only up to a deadline, then get `503`.
//! An overloaded proxy sheds load instead of building an unbounded queue.

pub mod config;
pub mod director;
pub mod imaging;
pub mod pool;
pub mod proxy;

#[cfg(test)]
pub(crate) mod test_helpers;
