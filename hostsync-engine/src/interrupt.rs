//! The interrupt channel.
//!
//! User signals and fatal conditions raised by background jobs travel on the
//! same channel; the orchestrator is its only reader.

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interrupt {
    /// SIGINT/SIGTERM from the operator.
    User,
    /// A background job hit a condition the run cannot survive.
    Fatal { origin: String, reason: String },
}

impl Interrupt {
    pub fn is_user(&self) -> bool {
        matches!(self, Interrupt::User)
    }

    pub fn describe(&self) -> String {
        match self {
            Interrupt::User => "interrupted by user".to_owned(),
            Interrupt::Fatal { origin, reason } => format!("{origin}: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterruptSender(mpsc::UnboundedSender<Interrupt>);

impl InterruptSender {
    pub fn send(&self, interrupt: Interrupt) {
        let _ = self.0.send(interrupt);
    }

    pub fn user(&self) {
        self.send(Interrupt::User);
    }

    pub fn fatal(&self, origin: impl Into<String>, reason: impl Into<String>) {
        self.send(Interrupt::Fatal {
            origin: origin.into(),
            reason: reason.into(),
        });
    }
}

#[derive(Debug)]
pub struct InterruptReceiver(mpsc::UnboundedReceiver<Interrupt>);

impl InterruptReceiver {
    pub async fn recv(&mut self) -> Option<Interrupt> {
        self.0.recv().await
    }

    /// A pending interrupt, without waiting.
    pub fn try_recv(&mut self) -> Option<Interrupt> {
        self.0.try_recv().ok()
    }
}

pub fn channel() -> (InterruptSender, InterruptReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InterruptSender(tx), InterruptReceiver(rx))
}

/// Forward every SIGINT and SIGTERM into `tx` as [`Interrupt::User`].
///
/// Keeps listening after the first signal so a second one can escalate.
pub fn install_signal_handlers(tx: InterruptSender) -> std::io::Result<JoinHandle<()>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(()) = sigint.recv() => tracing::info!("received SIGINT"),
                Some(()) = sigterm.recv() => tracing::info!("received SIGTERM"),
                else => break,
            }
            tx.user();
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interrupts_arrive_in_order() {
        let (tx, mut rx) = channel();
        assert_eq!(rx.try_recv(), None);
        tx.fatal("disk_space_monitor", "3% free on /");
        tx.user();
        assert_eq!(
            rx.recv().await,
            Some(Interrupt::Fatal {
                origin: "disk_space_monitor".into(),
                reason: "3% free on /".into()
            })
        );
        assert!(rx.try_recv().unwrap().is_user());
    }
}
