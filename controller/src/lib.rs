pub mod control_loop;
pub mod error;
pub mod events;
pub mod hardware;
pub mod interrupts;
pub mod mock;
pub mod recorder;
#[cfg(feature = "rpi")]
pub mod rpi;
pub mod settings_store;
pub mod shutdown;
pub mod simulated;

pub use control_loop::{ControlLoop, LoopState, TickOutcome};
pub use error::{
    ActuatorError, HardwareError, InterruptOverflow, RecorderError, SensorError, StartupError,
};
pub use events::{OverrideQueue, PushOutcome};
pub use hardware::{ButtonEdge, HardwareBus, Output};
pub use interrupts::ButtonInterruptHandler;
pub use recorder::{JsonLinesRecorder, StateRecorder, TracingRecorder};
pub use settings_store::SettingsStore;
pub use shutdown::{Shutdown, ShutdownHandle};
pub use simulated::SimulatedBus;
