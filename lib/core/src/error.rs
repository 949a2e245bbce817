//! Shared `Result` alias.
//!
//! Every crate defines its own error enums; fallible operations return them
//! wrapped in a rootcause `Report` so callers can inspect the context with
//! `current_context()` while still carrying attachments.

use rootcause::Report;

/// `Result` whose error is a `Report` over the context type `C`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug, PartialEq, Eq)]
    struct Missing;

    impl fmt::Display for Missing {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("missing")
        }
    }

    impl std::error::Error for Missing {}

    fn lookup(present: bool) -> Result<u8, Missing> {
        if present { Ok(7) } else { Err(Missing.into()) }
    }

    #[test]
    fn context_is_recoverable_from_the_report() {
        assert_eq!(lookup(true).ok(), Some(7));
        let err = lookup(false).unwrap_err();
        assert_eq!(err.current_context(), &Missing);
    }
}
