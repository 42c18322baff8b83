pub mod channel;
pub mod customer;
pub mod intent;
pub mod outreach;
pub mod recommendation;

pub use channel::Channel;
pub use customer::{CatalogService, Customer, ValueTier};
pub use intent::{CustomerIntent, DropReason, IntentData, IntentEvent, IntentState};
pub use outreach::{
    CandidateStatus, OpenSlot, OutreachAttempt, OutreachCandidate, ResponseStatus, TriggerReason,
};
pub use recommendation::{ProductRecommendation, RecommendationStatus, ServiceClass};
