//! BSP-Simulation: synthetic acquisition board
//!
//! Generates two-channel biosignal frames in the board's wire format, either
//! in bulk or paced in real time, for testing the acquisition pipeline without
//! hardware.

pub mod frame_simulator;
pub mod real_time_stream;
pub mod signal_patterns;

pub use frame_simulator::*;
pub use real_time_stream::*;
pub use signal_patterns::*;
