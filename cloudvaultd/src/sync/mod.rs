pub mod engine;
pub mod events;
pub mod local_walk;
pub mod local_watcher;
pub mod paths;
pub mod reconcile;
pub mod transfer;
pub mod tree;
pub mod triggers;

#[cfg(test)]
pub(crate) mod test_support;
