pub mod client;
pub mod error;
pub mod mock;
pub mod rest;
pub mod session;

pub use client::{DeviceControl, MAX_ADDRESS};
pub use error::DeviceError;
pub use mock::{DeviceCall, MockDevice};
pub use rest::RestDevice;
pub use session::DeviceSession;
