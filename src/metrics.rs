use std::time::Instant;

use kube::ResourceExt;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, Registry};

use crate::{
    reconcilers::{ChildChange, Outcome},
    resources::Plex,
    Error,
};

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounter,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    pub writes: IntCounterVec,
}

impl Metrics {
    /// Create the operator metrics and register them with `registry`
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "plex_operator_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &[],
        )?;
        let failures = IntCounterVec::new(
            opts!(
                "plex_operator_reconciliation_errors_total",
                "reconciliation errors"
            ),
            &["instance", "error"],
        )?;
        let reconciliations = IntCounter::new("plex_operator_reconciliations_total", "reconciliations")?;
        let writes = IntCounterVec::new(
            opts!("plex_operator_writes_total", "writes issued by reconciliation"),
            &["kind"],
        )?;

        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(writes.clone()))?;

        Ok(Self {
            reconciliations,
            failures,
            reconcile_duration,
            writes,
        })
    }

    pub fn reconcile_failure(&self, plex: &Plex, e: &Error) {
        self.failures
            .with_label_values(&[plex.name_any().as_ref(), e.metric_label().as_ref()])
            .inc()
    }

    /// Count the writes a reconcile pass went through with
    pub fn record_writes(&self, outcome: &Outcome) {
        match outcome.child {
            Some(ChildChange::Created) => self.writes.with_label_values(&["create"]).inc(),
            Some(ChildChange::Scaled { .. }) => self.writes.with_label_values(&["scale"]).inc(),
            Some(ChildChange::Unchanged) | None => {}
        }
        if outcome.status_written {
            self.writes.with_label_values(&["status"]).inc();
        }
    }

    pub fn count_and_measure(&self) -> ReconcileMeasurer {
        self.reconciliations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: HistogramVec,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric.with_label_values(&[]).observe(duration);
    }
}
