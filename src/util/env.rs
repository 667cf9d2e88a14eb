//! Terminal detection.

use std::io::IsTerminal;

/// Whether human output should be colored.
///
/// `no_color` is the resolved setting (flag, `NO_COLOR`, config). Dumb
/// terminals and redirected stdout never get color.
#[must_use]
pub fn should_use_color(no_color: bool) -> bool {
    if no_color {
        return false;
    }
    if std::env::var("TERM").is_ok_and(|t| t == "dumb") {
        return false;
    }
    std::io::stdout().is_terminal()
}
