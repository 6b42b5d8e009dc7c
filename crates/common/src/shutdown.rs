//! SIGINT/SIGTERM handling for the Switchyard binaries

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Exit status used when a second signal interrupts draining
const FORCED_EXIT_CODE: i32 = 130;

/// Cancel the returned token on the first SIGTERM or SIGINT.
///
/// `component` names the process in the log. Workers say goodbye and the
/// dispatcher drains its connections after the first signal; a second one
/// exits immediately.
pub fn install_shutdown_handler(component: &'static str) -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let trigger = token.clone();
    tokio::spawn(async move {
        let name = next_signal(&mut sigterm, &mut sigint).await;
        info!("Switchyard {} received {}, draining", component, name);
        trigger.cancel();

        let name = next_signal(&mut sigterm, &mut sigint).await;
        warn!("Switchyard {} received {} while draining, exiting now", component, name);
        std::process::exit(FORCED_EXIT_CODE);
    });

    Ok(token)
}

async fn next_signal(sigterm: &mut Signal, sigint: &mut Signal) -> &'static str {
    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_starts_uncancelled() {
        let token = install_shutdown_handler("test").unwrap();
        assert!(!token.is_cancelled());

        let child = token.child_token();
        token.cancel();
        assert!(child.is_cancelled());
    }
}
