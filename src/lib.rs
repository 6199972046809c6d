pub mod compute;
pub mod config;
pub mod humanize;
pub mod observability;
pub mod queue;
pub mod shutdown;
pub mod storage;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;
