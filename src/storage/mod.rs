//! Durable storage layout

pub mod layout;

pub use layout::StorageLayout;
