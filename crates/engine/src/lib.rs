pub mod barrier;
pub mod executor;
pub mod rule;
pub mod scheduler;

pub use barrier::FlushHandle;
pub use executor::OrderExecutor;
pub use rule::{Outcome, PositionMirror, PositionStatus, RuleState, StrategyRule, Transition};
pub use scheduler::{OrderEventPump, SchedulerEvent, StrategyRuleScheduler};
