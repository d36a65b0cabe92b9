//! Job metrics.
//!
//! Recorded through the `metrics` facade; the server installs the Prometheus
//! recorder, so these are no-ops in tests and on nodes without one.

use metrics::{counter, histogram};

use fleetcron_models::JobPhase;

/// Metric names as constants for consistency.
pub mod names {
    // Scheduler
    pub const TICKS_TOTAL: &str = "fleetcron_ticks_total";
    pub const JOB_RUNS_TOTAL: &str = "fleetcron_job_runs_total";
    pub const PHASE_FAILURES_TOTAL: &str = "fleetcron_phase_failures_total";
    pub const PHASE_DURATION_SECONDS: &str = "fleetcron_phase_duration_seconds";

    // Leases
    pub const LEASE_CLAIMS_TOTAL: &str = "fleetcron_lease_claims_total";

    // Job bodies
    pub const FEED_ITEMS_TOTAL: &str = "fleetcron_feed_items_total";
    pub const FEED_SOURCE_FAILURES_TOTAL: &str = "fleetcron_feed_source_failures_total";
    pub const MAIL_MESSAGES_TOTAL: &str = "fleetcron_mail_messages_total";
    pub const SEGMENTS_CONVERTED_TOTAL: &str = "fleetcron_segments_converted_total";
    pub const VIDEOS_DELIVERED_TOTAL: &str = "fleetcron_videos_delivered_total";
}

pub fn record_tick(role: &str) {
    counter!(names::TICKS_TOTAL, "role" => role.to_string()).increment(1);
}

/// One job driven through a tick; `path` is `single_node`, `coordinator`, `worker` or `skipped`.
pub fn record_job_run(job: &str, path: &str) {
    let labels = [("job", job.to_string()), ("path", path.to_string())];
    counter!(names::JOB_RUNS_TOTAL, &labels).increment(1);
}

pub fn record_phase_failure(job: &str, phase: JobPhase, transient: bool) {
    let labels = [
        ("job", job.to_string()),
        ("phase", phase.as_str().to_string()),
        ("kind", if transient { "transient" } else { "permanent" }.to_string()),
    ];
    counter!(names::PHASE_FAILURES_TOTAL, &labels).increment(1);
}

pub fn record_phase_duration(job: &str, phase: JobPhase, duration_secs: f64) {
    let labels = [("job", job.to_string()), ("phase", phase.as_str().to_string())];
    histogram!(names::PHASE_DURATION_SECONDS, &labels).record(duration_secs);
}

/// `outcome` is `claimed`, `reclaimed` or `busy`.
pub fn record_lease_claim(job: &str, outcome: &str) {
    let labels = [("job", job.to_string()), ("outcome", outcome.to_string())];
    counter!(names::LEASE_CLAIMS_TOTAL, &labels).increment(1);
}

pub fn record_feed_items(source: &str, inserted: usize, skipped: usize) {
    counter!(names::FEED_ITEMS_TOTAL, "source" => source.to_string(), "result" => "inserted")
        .increment(inserted as u64);
    counter!(names::FEED_ITEMS_TOTAL, "source" => source.to_string(), "result" => "skipped")
        .increment(skipped as u64);
}

pub fn record_feed_source_failure(source: &str) {
    counter!(names::FEED_SOURCE_FAILURES_TOTAL, "source" => source.to_string()).increment(1);
}

pub fn record_mail(sent: usize, failed: usize) {
    counter!(names::MAIL_MESSAGES_TOTAL, "result" => "sent").increment(sent as u64);
    counter!(names::MAIL_MESSAGES_TOTAL, "result" => "failed").increment(failed as u64);
}

pub fn record_segment_converted() {
    counter!(names::SEGMENTS_CONVERTED_TOTAL).increment(1);
}

pub fn record_video_delivered() {
    counter!(names::VIDEOS_DELIVERED_TOTAL).increment(1);
}
