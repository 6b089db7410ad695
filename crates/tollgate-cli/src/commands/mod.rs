pub mod config;
pub mod limits;
pub mod simulate;

pub use limits::show_limits;
pub use simulate::{run_simulate, SimulateOptions};
