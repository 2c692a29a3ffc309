pub mod forcesleep;
pub mod idling;
pub mod quota_window;
pub mod workqueue;

pub use forcesleep::{SleepState, SleepStateQuery, Sleeper, SleeperConfig};
pub use idling::{IdleState, Idler, IdlerConfig};
