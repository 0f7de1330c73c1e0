//! Utility macros used across the connector.

/// Returns early with an error if a condition is not met.
///
/// Works like `assert!` but returns `Err($error)` instead of panicking, which keeps
/// the parser guard clauses flat.
///
/// ```ignore
/// ensure!(self.headers.len() < self.max_header_count, ParseError::too_many_headers(self.max_header_count));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
