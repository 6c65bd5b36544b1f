//! Candidate search: constraints in, ordered eligible resources out.

use crate::domain::{Resource, Subject};
use crate::error::StoreError;
use crate::schedule::compat::CompatibilityClass;
use crate::schedule::window::Window;
use crate::store::{AllocationStore, CandidateQuery};
use tracing::debug;

/// Resources that could host `subject` for `test_type` during `window`,
/// ordered by name. Holds no locks, so the answer may be stale by the time
/// the caller acts on it; the allocator re-checks under a row lock.
///
/// An empty list is a normal answer.
pub async fn find_candidates(
    store: &dyn AllocationStore,
    subject: &Subject,
    test_type: &str,
    window: Window,
) -> Result<Vec<Resource>, StoreError> {
    let query = CandidateQuery {
        class: CompatibilityClass::derive(subject, test_type),
        window,
    };
    let found = store.find_candidates(&query).await?;
    debug!(
        "{} candidate(s) for subject {} ({} / {} / {}) in {window}",
        found.len(),
        subject.code,
        query.class.weight_class.as_tag(),
        query.class.drive_type,
        query.class.test_type,
    );
    Ok(found)
}
