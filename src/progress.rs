//! Observer trait for conversion job events.
//!
//! Pass an [`Arc<dyn JobProgressCallback>`] to
//! [`crate::orchestrator::JobOrchestrator::with_observer`] to receive every
//! state change, status check and user-facing notification of a job.
//!
//! # Why callbacks instead of channels?
//!
//! Jobs run detached on the runtime. A callback lets the host forward events
//! to its own notification system, a log table or a terminal spinner without
//! the library knowing which. The trait is `Send + Sync` because a job may
//! report from whichever worker thread it is polled on.
//!
//! # Example
//!
//! ```rust
//! use markup_gateway::{ArticleId, JobProgressCallback, JobState};
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct Recorder(Mutex<Vec<JobState>>);
//!
//! impl JobProgressCallback for Recorder {
//!     fn on_state_change(&self, _article: ArticleId, _from: JobState, to: JobState) {
//!         self.0.lock().unwrap().push(to);
//!     }
//! }
//!
//! let rec = Arc::new(Recorder::default());
//! rec.on_state_change(ArticleId(1), JobState::Idle, JobState::Submitted);
//! assert_eq!(rec.0.lock().unwrap().as_slice(), &[JobState::Submitted]);
//! ```

use crate::model::{ArticleId, JobId, JobState, JobStatus};
use std::sync::Arc;

/// Receives events from a running conversion job.
///
/// All methods default to no-ops so implementors only override what they
/// need.
pub trait JobProgressCallback: Send + Sync {
    /// A validated state transition happened.
    fn on_state_change(&self, article: ArticleId, from: JobState, to: JobState) {
        let _ = (article, from, to);
    }

    /// The server answered one status check.
    ///
    /// # Arguments
    /// * `attempt`: 1-based poll number
    /// * `max_attempts`: configured poll bound
    fn on_poll(
        &self,
        article: ArticleId,
        job: &JobId,
        attempt: u32,
        max_attempts: u32,
        status: JobStatus,
    ) {
        let _ = (article, job, attempt, max_attempts, status);
    }

    /// A message meant for the user who triggered the job.
    fn on_notify(&self, article: ArticleId, message: &str, success: bool) {
        let _ = (article, message, success);
    }

    /// The job reached a terminal state.
    fn on_complete(&self, article: ArticleId, state: JobState) {
        let _ = (article, state);
    }
}

/// Observer that ignores every event. Default for new orchestrators.
pub struct NoopJobProgress;

impl JobProgressCallback for NoopJobProgress {}

pub type ProgressCallback = Arc<dyn JobProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Tracking {
        polls: AtomicUsize,
        notices: Mutex<Vec<(String, bool)>>,
        last: Mutex<Option<JobState>>,
    }

    impl JobProgressCallback for Tracking {
        fn on_poll(&self, _: ArticleId, _: &JobId, _: u32, _: u32, _: JobStatus) {
            self.polls.fetch_add(1, Ordering::SeqCst);
        }

        fn on_notify(&self, _: ArticleId, message: &str, success: bool) {
            self.notices
                .lock()
                .unwrap()
                .push((message.to_string(), success));
        }

        fn on_complete(&self, _: ArticleId, state: JobState) {
            *self.last.lock().unwrap() = Some(state);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopJobProgress;
        let job = JobId::parse("abc").unwrap();
        cb.on_state_change(ArticleId(1), JobState::Idle, JobState::Submitted);
        cb.on_poll(ArticleId(1), &job, 1, 60, JobStatus::Pending);
        cb.on_notify(ArticleId(1), "hello", true);
        cb.on_complete(ArticleId(1), JobState::Succeeded);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let t = Tracking::default();
        let job = JobId::parse("j1").unwrap();
        t.on_poll(ArticleId(4), &job, 1, 3, JobStatus::Pending);
        t.on_poll(ArticleId(4), &job, 2, 3, JobStatus::Complete);
        t.on_notify(ArticleId(4), "done", true);
        t.on_complete(ArticleId(4), JobState::Succeeded);

        assert_eq!(t.polls.load(Ordering::SeqCst), 2);
        assert_eq!(t.notices.lock().unwrap()[0], ("done".to_string(), true));
        assert_eq!(*t.last.lock().unwrap(), Some(JobState::Succeeded));
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopJobProgress);
        cb.on_complete(ArticleId(2), JobState::TimedOut);
    }
}
