pub mod events;
pub mod split_planner;
