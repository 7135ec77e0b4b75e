pub mod client;
pub mod config;
pub mod input;
pub mod interpolation;
pub mod network_system;

pub use client::{Client, ConnectionState, FrameReport};
pub use config::{ClientConfig, InterpolationConfig};
pub use input::{InputState, ScriptedInput};
pub use interpolation::{InterpolationStats, interpolate};
pub use network_system::{NetworkSystem, PacketInbox, SessionView};
