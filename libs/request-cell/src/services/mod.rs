pub mod authorization;
pub mod creation;
pub mod pricing;
pub mod transition;
