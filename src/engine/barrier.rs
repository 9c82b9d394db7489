//! Counting gate used as the barrier between waves.

use tokio::sync::mpsc;

/// Collects one report per task of a wave and opens once all have arrived.
///
/// Each task gets a [`WaveReporter`]. A reporter dropped without reporting
/// is seen as a missing report, so a lost task cannot hang the gate.
#[derive(Debug)]
pub struct WaveGate<T> {
    expected: usize,
    tx: Option<mpsc::UnboundedSender<T>>,
    rx: mpsc::UnboundedReceiver<T>,
}

/// Sending half handed to one task.
#[derive(Debug)]
pub struct WaveReporter<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> WaveGate<T> {
    /// Creates a gate expecting `expected` reports.
    #[must_use]
    pub fn new(expected: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            expected,
            tx: Some(tx),
            rx,
        }
    }

    /// Returns a reporter for one task.
    ///
    /// Returns `None` after [`WaveGate::wait`] has started.
    #[must_use]
    pub fn reporter(&self) -> Option<WaveReporter<T>> {
        self.tx.as_ref().map(|tx| WaveReporter { tx: tx.clone() })
    }

    /// Returns how many reports the gate waits for.
    #[must_use]
    pub const fn expected(&self) -> usize {
        self.expected
    }

    /// Waits until every expected report has arrived or every reporter is gone.
    ///
    /// Returns the reports received, in arrival order.
    pub async fn wait(mut self) -> Vec<T> {
        self.tx = None;
        let mut reports = Vec::with_capacity(self.expected);

        while reports.len() < self.expected {
            match self.rx.recv().await {
                Some(report) => reports.push(report),
                None => break,
            }
        }

        reports
    }
}

impl<T> WaveReporter<T> {
    /// Delivers this task's report.
    pub fn report(self, report: T) {
        // The gate only goes away when the engine stops waiting.
        let _ = self.tx.send(report);
    }
}
