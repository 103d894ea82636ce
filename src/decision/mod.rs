//! 慎思层：长期目标、决策引擎、进阶模式

pub mod engine;
pub mod goal;
pub mod progression;

pub use engine::{best_food, DecisionEngine};
pub use goal::{Goal, GoalKind, GoalManager, GoalPriority, GoalStatus};
pub use progression::Progression;
