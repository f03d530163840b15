pub mod accel;
pub mod error;
pub mod format;
pub mod golden;
pub mod job;
pub mod main;
pub mod mem_port;
pub mod params;
pub mod regfile;
pub mod ring;
pub mod scheduler;
pub mod streamer;
pub mod strobe;
pub mod tile_store;

pub use main::create_simulation;
