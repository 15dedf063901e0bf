//! Small helpers shared by the client and the CLI.

pub mod file_name;

pub use file_name::to_valid_file_name;
