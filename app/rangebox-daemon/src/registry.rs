//! Registry of the live controllers.
//!
//! The registry is the only shared resource guarded by a lock. Readers copy
//! the current `Arc` under the mutex and release it before any runtime I/O,
//! so a slow engine call never blocks a controller replacement; the
//! single-worker total order still guarantees the next command observes a
//! fresh controller after a restart.

use rangebox_fleet::{ExerciseController, PlatformController};
use std::sync::{Arc, Mutex, MutexGuard};

/// Owner of the live controller references.
pub struct ManagerRegistry {
    exercises: Mutex<Arc<ExerciseController>>,
    platform: Mutex<Arc<PlatformController>>,
}

impl ManagerRegistry {
    /// Creates a registry over freshly loaded controllers.
    #[must_use]
    pub fn new(exercises: Arc<ExerciseController>, platform: Arc<PlatformController>) -> Self {
        Self {
            exercises: Mutex::new(exercises),
            platform: Mutex::new(platform),
        }
    }

    /// Copies the current exercise controller reference.
    #[must_use]
    pub fn exercises(&self) -> Arc<ExerciseController> {
        Arc::clone(&lock(&self.exercises))
    }

    /// Copies the current platform controller reference.
    #[must_use]
    pub fn platform(&self) -> Arc<PlatformController> {
        Arc::clone(&lock(&self.platform))
    }

    /// Swaps in a rebuilt exercise controller; the old one drops with its
    /// last in-flight reference.
    pub fn replace_exercises(&self, controller: Arc<ExerciseController>) {
        *lock(&self.exercises) = controller;
    }

    /// Swaps in a rebuilt platform controller.
    pub fn replace_platform(&self, controller: Arc<PlatformController>) {
        *lock(&self.platform) = controller;
    }
}

// Only pointer copies happen under these locks, so a poisoned mutex still
// holds a usable value.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
