pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod fetch;
pub mod http;
pub mod output;
pub mod player;
pub mod queue;
pub mod resample;
pub mod session;
pub mod stage;
pub mod status;
pub mod timer;
pub mod transcode;
