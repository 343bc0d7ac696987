//! Internal helper macros shared by the protocol and pool modules.

/// Returns early with `Err($error)` when `$predicate` does not hold.
///
/// Used for option and framing validation where a failed check must surface
/// as a typed error rather than a panic.
///
/// ```ignore
/// ensure!(max_redirects > 0, Error::config("max_redirects must be greater than zero"));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error.into());
        }
    };
}

pub(crate) use ensure;
