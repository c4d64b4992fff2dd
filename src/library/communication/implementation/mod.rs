//! Broker trait implementations

#[cfg(test)]
pub mod mock;
pub mod redis;
