pub mod consumer_bridge;
pub mod controller;
pub mod duplex;
pub mod loopback;
pub mod monitor;
pub mod stats;
