//! BSP-Core: Foundation types for biosignal acquisition
//!
//! Error taxonomy, wire framing, ADC scaling and session state shared by the
//! filtering, simulation and streaming crates.

pub mod error;
pub mod frame;
pub mod session;
pub mod units;

pub use error::{BspError, BspResult};
pub use frame::{Frame, FrameDecoder, SequenceTracker, FRAME_CHANNELS, FRAME_LEN};
pub use session::{AcquisitionEvent, AcquisitionObserver, SessionState};
pub use units::AdcScale;
