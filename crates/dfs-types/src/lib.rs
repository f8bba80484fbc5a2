//! Addressing types shared by every storage backend.

mod file_location;

pub use self::file_location::{FileLocation, InvalidFileLocation};
