//! Human review queue.
//!
//! Items are ordered by priority tier, then by insertion sequence. Claims
//! expire after a TTL so abandoned work returns to the pool.

pub mod item;
mod queue;

pub use item::{
    Correction, NewReviewItem, ReviewItem, ReviewPriority, ReviewReason, ReviewStats,
    ReviewStatus, SubItem,
};
pub use queue::{apply_corrections, ReviewQueue, DEFAULT_CLAIM_TTL_MINUTES};
