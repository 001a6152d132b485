pub mod types;
pub mod mapper;
pub mod config;
pub mod error;

pub use types::*;
pub use mapper::map_post;
pub use config::{BoundingBox, Config, StreamFilter};
pub use error::TweetGraphError;
