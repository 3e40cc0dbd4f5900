pub mod event_bus;
pub mod runtime_context;

pub use event_bus::{EventBus, EventReceiver, GateEvent};
pub use runtime_context::{
    FakeIdGenerator, FakeTimeProvider, IdGenerator, RealIdGenerator, RealTimeProvider,
    RuntimeContext, TimeProvider,
};
