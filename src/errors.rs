//! Mangling error kinds.
//!
//! Mangling either succeeds or fails hard: there is no partial-success or retry path. The two
//! kinds below correspond to the reference system's `ASSERT` (an invariant the decoder or
//! caller should have prevented) and `ASSERT_NOT_IMPLEMENTED` (a feature this port has not
//! grown yet).

use failure::Fail;

/// Errors a mangling entry point can return.
#[derive(Debug, Fail)]
pub enum MangleError {
    /// An operand shape or instruction state the mangler should never be asked to handle.
    /// Encountering this means the decoder or builder handed the mangler something invalid.
    #[fail(display = "mangling invariant violated in {}: {}", site, detail)]
    Invariant {
        site: &'static str,
        detail: &'static str,
    },

    /// A feature this port does not implement. Distinct from `Invariant` so callers can
    /// choose to degrade (e.g. fall back to interpretation) rather than abort.
    #[fail(display = "not implemented: {}", _0)]
    NotImplemented(&'static str),
}

impl MangleError {
    pub fn invariant(site: &'static str, detail: &'static str) -> Self {
        MangleError::Invariant { site, detail }
    }

    pub fn not_implemented(what: &'static str) -> Self {
        MangleError::NotImplemented(what)
    }
}

/// Convenience alias used throughout the `mangle` module.
pub type MangleResult<T> = Result<T, MangleError>;
