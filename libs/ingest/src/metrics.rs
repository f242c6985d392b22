//! OpenTelemetry instruments for the ingest loop.

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;
use tokio::time::Instant;

#[derive(Clone)]
pub struct IngestMetrics {
    batches_processed: Counter<u64>,
    events_processed: Counter<u64>,
    event_errors: Counter<u64>,
    extractor_errors: Counter<u64>,
    dropped_events: Counter<u64>,
    reconciler_deletes: Counter<u64>,
    retention_deleted_nodes: Counter<u64>,
    queue_depth: Gauge<i64>,
    batch_duration: Histogram<f64>,
}

impl IngestMetrics {
    pub fn new(meter: &Meter) -> Self {
        let batches_processed = meter
            .u64_counter("batches_processed")
            .with_description("Total number of event batches processed by the pipeline")
            .build();

        let events_processed = meter
            .u64_counter("events_processed")
            .with_description("Total number of events processed by the pipeline")
            .build();

        let event_errors = meter
            .u64_counter("event_errors")
            .with_description("Number of events that failed a pipeline phase and were skipped")
            .build();

        let extractor_errors = meter
            .u64_counter("extractor_errors")
            .with_description("Number of relationship extractor failures")
            .build();

        let dropped_events = meter
            .u64_counter("dropped_events")
            .with_description("Number of events dropped on listener backpressure")
            .build();

        let reconciler_deletes = meter
            .u64_counter("reconciler_synthetic_deletes")
            .with_description("Number of synthetic DELETE events emitted by the reconciler")
            .build();

        let retention_deleted_nodes = meter
            .u64_counter("retention_deleted_nodes")
            .with_description("Number of event nodes removed by retention sweeps")
            .build();

        let queue_depth = meter
            .i64_gauge("listener_queue_depth")
            .with_description("Events waiting in the listener queue")
            .build();

        let batch_duration = meter
            .f64_histogram("batch_duration_seconds")
            .with_description("Histogram of full batch processing durations")
            .build();

        Self {
            batches_processed,
            events_processed,
            event_errors,
            extractor_errors,
            dropped_events,
            reconciler_deletes,
            retention_deleted_nodes,
            queue_depth,
            batch_duration,
        }
    }

    pub fn batch_processed(&self, events: u64) {
        self.batches_processed.add(1, &[]);
        self.events_processed.add(events, &[]);
    }

    pub fn event_error(&self, phase: &'static str) {
        self.event_errors.add(1, &[KeyValue::new("phase", phase)]);
    }

    pub fn extractor_error(&self) {
        self.extractor_errors.add(1, &[]);
    }

    pub fn event_dropped(&self) {
        self.dropped_events.add(1, &[]);
    }

    pub fn reconciler_delete(&self) {
        self.reconciler_deletes.add(1, &[]);
    }

    pub fn retention_deleted(&self, nodes: u64) {
        self.retention_deleted_nodes.add(nodes, &[]);
    }

    pub fn queue_depth_set(&self, depth: i64) {
        self.queue_depth.record(depth, &[]);
    }

    pub fn batch_timer(&self) -> BatchMeasurer {
        BatchMeasurer {
            start: Instant::now(),
            metric: self.batch_duration.clone(),
        }
    }
}

/// Records the batch duration on drop.
pub struct BatchMeasurer {
    start: Instant,
    metric: Histogram<f64>,
}

impl Drop for BatchMeasurer {
    fn drop(&mut self) {
        self.metric.record(self.start.elapsed().as_secs_f64(), &[]);
    }
}
