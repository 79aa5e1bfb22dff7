use crate::stop::StopSignal;
use anyhow::Result;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::thread;
use tracing::warn;

/// Set up interrupt handlers for graceful shutdown
///
/// The first SIGINT (Ctrl-C) or SIGTERM triggers `stop` so workers finish
/// their current attempt and sessions are released. A second signal exits
/// immediately with the conventional status for that signal.
pub fn setup_interrupt_handlers(stop: StopSignal) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    thread::spawn(move || {
        for sig in signals.forever() {
            if stop.is_stopped() {
                eprintln!("Forced exit");
                std::process::exit(exit_code(sig));
            }
            warn!("Received signal {}, stopping after current attempts", sig);
            eprintln!("Stopping... press Ctrl-C again to force exit");
            stop.trigger();
        }
    });

    Ok(())
}

fn exit_code(sig: i32) -> i32 {
    match sig {
        SIGINT => 130,  // Standard exit code for SIGINT
        SIGTERM => 143, // Standard exit code for SIGTERM
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(SIGINT), 130);
        assert_eq!(exit_code(SIGTERM), 143);
    }
}
