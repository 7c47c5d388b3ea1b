//! Metrics definitions for the relay.

use shared::metrics_defs::{MetricDef, MetricType};

pub const TOKEN_CACHE_HIT: MetricDef = MetricDef {
    name: "token.cache.hit",
    metric_type: MetricType::Counter,
    description: "Access tokens served from the token cache",
};

pub const TOKEN_CACHE_MISS: MetricDef = MetricDef {
    name: "token.cache.miss",
    metric_type: MetricType::Counter,
    description: "Token cache lookups that found no usable token",
};

pub const TOKEN_REMOTE_FETCH: MetricDef = MetricDef {
    name: "token.remote_fetch",
    metric_type: MetricType::Counter,
    description: "Calls to the vendor token endpoint",
};

pub const TOKEN_EXPIRED: MetricDef = MetricDef {
    name: "token.expired",
    metric_type: MetricType::Counter,
    description: "Vendor responses reporting an expired access token",
};

pub const VENDOR_CALL_ATTEMPTS: MetricDef = MetricDef {
    name: "vendor.call.attempts",
    metric_type: MetricType::Histogram,
    description: "Attempts needed per send or upload, retries included",
};

pub const MEDIA_REJECTED: MetricDef = MetricDef {
    name: "media.rejected",
    metric_type: MetricType::Counter,
    description: "Attachments rejected before upload (missing or too large)",
};

pub const REQUESTS_REJECTED: MetricDef = MetricDef {
    name: "requests.rejected",
    metric_type: MetricType::Counter,
    description: "Inbound requests answered with a client error",
};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "requests.duration",
    metric_type: MetricType::Histogram,
    description: "Time to relay one inbound message in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[
    TOKEN_CACHE_HIT,
    TOKEN_CACHE_MISS,
    TOKEN_REMOTE_FETCH,
    TOKEN_EXPIRED,
    VENDOR_CALL_ATTEMPTS,
    MEDIA_REJECTED,
    REQUESTS_REJECTED,
    REQUEST_DURATION,
];
