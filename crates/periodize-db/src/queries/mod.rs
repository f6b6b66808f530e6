pub mod creation_guards;
pub mod entitlements;
pub mod generation_queue;
pub mod payments;
pub mod plans;
