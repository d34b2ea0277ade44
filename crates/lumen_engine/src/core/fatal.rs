//! Last-resort handling for unrecoverable errors.

use std::error::Error;
use std::io::Write;

/// Full `source()` chain of `error`, outermost first
pub fn diagnostic(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Log `error`, ring the terminal bell and exit with a failure status.
pub fn abort_with_diagnostic(error: &dyn Error) -> ! {
    log::error!("Fatal: {}", diagnostic(error));
    log::logger().flush();

    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "\x07");
    let _ = stderr.flush();
    std::process::exit(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("outer")]
    struct Outer(#[source] Inner);

    #[derive(Debug, Error)]
    #[error("inner")]
    struct Inner;

    #[test]
    fn diagnostic_includes_the_source_chain() {
        assert_eq!(diagnostic(&Outer(Inner)), "outer: inner");
    }
}
