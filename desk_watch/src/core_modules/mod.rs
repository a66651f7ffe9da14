pub mod detection;
pub mod log_writer;
pub mod presence;
pub mod recorder;
pub mod state_machine;
pub mod utils;
