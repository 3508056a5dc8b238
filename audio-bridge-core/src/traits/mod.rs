pub mod delegate;
pub mod device_host;
pub mod loopback;
pub mod session_directory;
