//! Error handling for the binary

use crate::error::CadenceError;
use tracing::error;

/// Report a fatal error and exit with its status code
///
/// A [`CadenceError`] anywhere in the chain picks the exit code and a
/// user-facing message; anything else exits with 1. In verbose mode the full
/// cause chain is printed as well.
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    error!("Fatal error: {:#}", error);

    let exit_code = match error.downcast_ref::<CadenceError>() {
        Some(cadence_err) => {
            eprintln!("Error: {}", cadence_err.user_message());
            cadence_err.exit_code()
        }
        None => {
            eprintln!("Error: {error}");
            1
        }
    };

    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }

    std::process::exit(exit_code)
}
