use uuid::Uuid;

/// Unique identifier for a goal (one queue item).
pub type GoalId = Uuid;

/// Unique identifier for a generated candidate.
pub type CandidateId = Uuid;

/// Unique identifier for a built plan.
pub type PlanId = Uuid;

/// Identity of a dispatcher holding (or trying to hold) a goal lease.
pub type OwnerId = String;

/// vCPU tiers the execution client can be scaled between, ascending.
pub const VCPU_TIERS: [u32; 4] = [1, 2, 4, 8];

/// The next tier above `current`, if any.
pub fn next_vcpu_tier(current: u32) -> Option<u32> {
    VCPU_TIERS.iter().copied().find(|t| *t > current)
}

/// The next tier below `current`, if any.
pub fn previous_vcpu_tier(current: u32) -> Option<u32> {
    VCPU_TIERS.iter().rev().copied().find(|t| *t < current)
}
