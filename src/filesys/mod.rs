//! File system primitives shared by storage, the detector and the builders.

pub mod dir;
pub mod file;
pub mod walk;

pub use dir::Dir;
pub use file::File;
