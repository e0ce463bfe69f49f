//! Small assertion/panic helpers shared by the proxy crates.
//!
//! In debug builds these behave like the standard `assert!` family; in
//! release builds a failed check is logged via `tracing::error!` instead of
//! aborting the process, since a single misbehaving connection should never
//! be allowed to take the whole proxy down.

mod assert;
