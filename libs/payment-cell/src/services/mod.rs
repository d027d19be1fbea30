pub mod notify;
pub mod provider;
pub mod signature;
pub mod webhook;
