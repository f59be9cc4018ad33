pub mod config;
pub mod controller;
pub mod decoder;
pub mod error;
pub mod http_client;
pub mod model;
pub mod normalizer;
pub mod stream;
pub mod telemetry;
pub mod transport;
#[cfg(test)]
pub mod test_util;
