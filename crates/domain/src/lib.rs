pub mod attachments;
pub mod cell;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod notifications;
pub mod observability;
pub mod pagination;
pub mod ports;
pub mod profile;
pub mod ratings;
pub mod reconcile;
pub mod reply;
pub mod submission;
pub mod util;
pub mod wire;

#[cfg(test)]
pub(crate) mod testing;

pub type DomainResult<T> = Result<T, error::DomainError>;
