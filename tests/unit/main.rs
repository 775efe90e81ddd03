//! Component-level tests

mod test_logbus;
mod test_queue;
mod test_store;
mod test_vault;
