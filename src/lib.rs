pub mod cleanup;
pub mod configuration;
pub mod controller;
pub mod dispatch;
pub mod error_handling;
pub mod network;
pub mod push;
pub mod session_management;
pub mod storage;
pub mod web_interface;
pub mod worker;

#[cfg(test)]
mod test_support;
