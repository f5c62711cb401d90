//! Metrics definitions for the configuration sync engine.

use shared::metrics_defs::{MetricDef, MetricType};

pub const SNAPSHOT_UPDATES: MetricDef = MetricDef {
    name: "snapshot.update",
    metric_type: MetricType::Counter,
    description: "Number of snapshot updates published",
};

pub const SNAPSHOT_UPDATE_FAILURES: MetricDef = MetricDef {
    name: "snapshot.update.failed",
    metric_type: MetricType::Counter,
    description: "Number of snapshot updates that were rejected and left the previous snapshot current",
};

pub const SNAPSHOT_PARTIAL_UPDATES: MetricDef = MetricDef {
    name: "snapshot.update.partial",
    metric_type: MetricType::Counter,
    description: "Number of snapshot updates published with some failed actions",
};

pub const ACTION_FAILURES: MetricDef = MetricDef {
    name: "action.failed",
    metric_type: MetricType::Counter,
    description: "Number of update actions skipped inside a composite action",
};

pub const GATEWAYS: MetricDef = MetricDef {
    name: "snapshot.gateways",
    metric_type: MetricType::Gauge,
    description: "Number of gateways with a snapshot",
};

pub const BOOTSTRAP_ATTEMPTS: MetricDef = MetricDef {
    name: "bootstrap.attempts",
    metric_type: MetricType::Counter,
    description: "Number of snapshot cache bootstrap attempts",
};

pub const REPLICATION_NOTIFICATIONS: MetricDef = MetricDef {
    name: "replication.notifications",
    metric_type: MetricType::Counter,
    description: "Number of change notifications received from the durable store",
};

pub const REPLICATION_DROPPED: MetricDef = MetricDef {
    name: "replication.notifications.dropped",
    metric_type: MetricType::Counter,
    description: "Number of notifications dropped because their table is unknown",
};

pub const REPLICATION_RESYNC_DURATION: MetricDef = MetricDef {
    name: "replication.resync.duration",
    metric_type: MetricType::Histogram,
    description: "Time to reload the replica from the durable store in seconds",
};

pub const POST_PROCESSING_PANICS: MetricDef = MetricDef {
    name: "replication.post_processing.panic",
    metric_type: MetricType::Counter,
    description: "Number of post-processing tasks that panicked",
};

// TODO: generate this list with a macro so new definitions cannot be left out of `describe_all`.
pub const ALL_METRICS: &[MetricDef] = &[
    SNAPSHOT_UPDATES,
    SNAPSHOT_UPDATE_FAILURES,
    SNAPSHOT_PARTIAL_UPDATES,
    ACTION_FAILURES,
    GATEWAYS,
    BOOTSTRAP_ATTEMPTS,
    REPLICATION_NOTIFICATIONS,
    REPLICATION_DROPPED,
    REPLICATION_RESYNC_DURATION,
    POST_PROCESSING_PANICS,
];
