pub mod audit;
pub mod error;
pub mod event;
pub mod id;
pub mod money;
pub mod payment;
pub mod provider;
pub mod store;
pub mod ticket;
pub mod transaction;
pub mod user;
