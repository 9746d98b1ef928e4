//! Session orchestration: relay loops and the supervisor that fans them out.

pub mod relay;
pub mod supervisor;

pub use relay::{
    RelayCounters, RelayError, RelayHandle, RelayLoop, RelayOutcome, RelayState, SessionParams,
};
pub use supervisor::{SegmentOutcome, SegmentResult, SessionReport, SessionSupervisor};
