//! Daemon lifecycle: activation of the recognition feature and shutdown

mod activation;
mod controller;
mod shutdown;

pub use activation::Activation;
pub use controller::Controller;
pub use shutdown::ShutdownSignal;
