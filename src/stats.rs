use parking_lot::Mutex;

/// Element-wise running sum of per-invocation statistics.
///
/// Contributions may differ in length; the totals grow with zeros to fit the
/// longest one seen.
#[derive(Debug, Default)]
pub struct RunningStats {
    totals: Mutex<Vec<f64>>,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one contribution into the totals
    pub fn accumulate(&self, contribution: &[f64]) {
        if contribution.is_empty() {
            return;
        }
        let mut totals = self.totals.lock();
        if totals.len() < contribution.len() {
            totals.resize(contribution.len(), 0.0);
        }
        for (total, value) in totals.iter_mut().zip(contribution) {
            *total += value;
        }
    }

    /// Copy of the current totals
    pub fn snapshot(&self) -> Vec<f64> {
        self.totals.lock().clone()
    }
}
