//! The resource allocation engine.
//!
//! | Module | Role |
//! |--------|------|
//! | [`window`] | Inclusive date windows, the overlap predicate, request limits |
//! | [`compat`] | Subject attributes reduced to containment-matchable tags |
//! | [`candidates`] | Lock-free candidate search |
//! | [`allocator`] | Check-lock-check-act transactions with backup windows |
//! | [`conflicts`] | Double-booking scan |
//! | [`service`] | Validation, subject resolution and error translation for callers |

pub mod allocator;
pub mod candidates;
pub mod compat;
pub mod conflicts;
pub mod service;
pub mod window;

pub use allocator::{AllocationOutcome, Allocator, AllocatorConfig, Booking};
pub use candidates::find_candidates;
pub use compat::{CompatibilityClass, WeightClass};
pub use conflicts::{Conflict, detect_conflicts};
pub use service::{AllocationRequest, AllocationService, ScheduledTest, SubjectSchedule};
pub use window::{MAX_ALLOCATION_DAYS, Window, WindowError};
