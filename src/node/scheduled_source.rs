use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::AudioNode;
use crate::{AtomicF64, AudioGraphError};

/// Interface of source nodes, controlling start and stop times.
/// The node will emit silence before it is started, and after it has ended.
///
/// Starting a source keeps it alive and its outputs enabled until it has finished playing, even
/// when the node itself is dropped.
pub trait AudioScheduledSourceNode: AudioNode {
    /// Play immediately
    ///
    /// # Errors
    ///
    /// `InvalidStateError` if the source was already started
    fn start(&self) -> Result<(), AudioGraphError> {
        let when = self.context().current_time();
        self.start_at(when)
    }

    /// Schedule playback start at given timestamp
    ///
    /// # Errors
    ///
    /// - `InvalidStateError` if the source was already started
    /// - `RangeError` if the timestamp is negative or not finite
    fn start_at(&self, when: f64) -> Result<(), AudioGraphError>;

    /// Stop immediately
    ///
    /// # Errors
    ///
    /// `InvalidStateError` if the source was not started
    fn stop(&self) -> Result<(), AudioGraphError> {
        let when = self.context().current_time();
        self.stop_at(when)
    }

    /// Schedule playback stop at given timestamp
    ///
    /// # Errors
    ///
    /// - `InvalidStateError` if the source was not started
    /// - `RangeError` if the timestamp is negative or not finite
    fn stop_at(&self, when: f64) -> Result<(), AudioGraphError>;
}

/// Start and stop times of a source, shared between the node and its processor
#[derive(Clone, Debug)]
pub(crate) struct Scheduler {
    inner: Arc<SchedulerInner>,
}

#[derive(Debug)]
struct SchedulerInner {
    started: AtomicBool,
    start: AtomicF64,
    stop: AtomicF64,
}

fn validate_when(when: f64) -> Result<(), AudioGraphError> {
    if !when.is_finite() || when < 0. {
        return Err(AudioGraphError::range(format!(
            "time should be a finite non-negative number, got {:?}",
            when
        )));
    }
    Ok(())
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                started: AtomicBool::new(false),
                start: AtomicF64::new(f64::INFINITY),
                stop: AtomicF64::new(f64::INFINITY),
            }),
        }
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Start time in seconds, infinite when not started
    pub fn get_start_at(&self) -> f64 {
        self.inner.start.load(Ordering::Acquire)
    }

    /// Stop time in seconds, infinite when not stopped
    pub fn get_stop_at(&self) -> f64 {
        self.inner.stop.load(Ordering::Acquire)
    }

    pub fn start_at(&self, when: f64) -> Result<(), AudioGraphError> {
        validate_when(when)?;
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(AudioGraphError::invalid_state(
                "cannot call `start` twice",
            ));
        }
        self.inner.start.store(when, Ordering::Release);
        Ok(())
    }

    pub fn stop_at(&self, when: f64) -> Result<(), AudioGraphError> {
        validate_when(when)?;
        if !self.inner.started.load(Ordering::Acquire) {
            return Err(AudioGraphError::invalid_state(
                "cannot call `stop` before `start`",
            ));
        }
        self.inner.stop.store(when, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_scheduler() {
        let scheduler = Scheduler::new();
        assert_eq!(scheduler.get_start_at(), f64::INFINITY);

        let err = scheduler.stop_at(1.).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStateError);

        let err = scheduler.start_at(-1.).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RangeError);

        scheduler.start_at(0.5).unwrap();
        assert_eq!(scheduler.get_start_at(), 0.5);
        let err = scheduler.start_at(1.).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStateError);

        // the stop time can be rescheduled
        scheduler.stop_at(2.).unwrap();
        scheduler.stop_at(1.).unwrap();
        assert_eq!(scheduler.clone().get_stop_at(), 1.);
    }
}
