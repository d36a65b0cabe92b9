//! Structured job logging utilities.
//!
//! Every line carries the job name and lifecycle phase so a tick can be
//! followed across nodes in the aggregated log stream.

use tracing::{debug, error, info, warn, Span};

use fleetcron_models::JobPhase;

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job: String,
    phase: JobPhase,
}

impl JobLogger {
    /// Create a logger for one job phase.
    pub fn new(job: &str, phase: JobPhase) -> Self {
        Self {
            job: job.to_string(),
            phase,
        }
    }

    /// Same job, different phase.
    pub fn phase(&self, phase: JobPhase) -> Self {
        Self {
            job: self.job.clone(),
            phase,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(job = %self.job, phase = %self.phase, "Phase started: {}", message);
    }

    pub fn log_progress(&self, message: &str) {
        info!(job = %self.job, phase = %self.phase, "Phase progress: {}", message);
    }

    /// Normal absence of work. Never logged above debug.
    pub fn log_idle(&self, message: &str) {
        debug!(job = %self.job, phase = %self.phase, "Idle: {}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job = %self.job, phase = %self.phase, "Phase warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(job = %self.job, phase = %self.phase, "Phase error: {}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(job = %self.job, phase = %self.phase, "Phase completed: {}", message);
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn current_phase(&self) -> JobPhase {
        self.phase
    }

    /// Create a tracing span for this job phase.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("job", job = %self.job, phase = %self.phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let logger = JobLogger::new("mail", JobPhase::GetTasks);
        assert_eq!(logger.job(), "mail");
        assert_eq!(logger.current_phase(), JobPhase::GetTasks);

        let next = logger.phase(JobPhase::DoTasks);
        assert_eq!(next.job(), "mail");
        assert_eq!(next.current_phase(), JobPhase::DoTasks);
    }
}
