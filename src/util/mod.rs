//! Utility modules

pub mod hex;
pub mod paths;
pub mod time;

pub use hex::{hex_dump, parse_address, parse_hex_bytes, to_hex};
pub use paths::{
    captures_dir, config_path, data_dir, init_data_dir, log_file_path, logs_dir, snapshots_dir,
};
pub use time::now_stamp;
