//! Measurement session pipeline
//!
//! ```text
//! start request -> SessionRegistry (single session, stop flag, observers)
//!                       |
//!                       v  spawned task
//!                  coordinator: configure -> stream -> finalize
//!                       |
//!   per sample:  normalize -> convert -> store -> metric -> fan-out
//! ```

mod context;
pub mod coordinator;
pub mod fanout;
pub mod messenger;
pub mod metric;
pub mod observer;
pub mod registry;

pub use context::AppContext;
pub use coordinator::{
    run_session, SessionDeps, SessionError, SessionOutcome, SessionPhase, SessionPlan,
    SessionReport, SessionSettings, StreamExit,
};
pub use fanout::{sample_envelope, ObserverHub, SampleBatcher};
pub use messenger::StateMessenger;
pub use metric::{compute_ift_points, MetricAccumulator, MetricFunction, WindowedRmsMetric};
pub use observer::{
    ChannelObserver, FrameReceiver, Observer, ObserverError, ObserverId, OutboundFrame,
};
pub use registry::{session_name, SessionRegistry, StartResult};
