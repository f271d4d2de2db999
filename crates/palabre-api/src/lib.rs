pub mod error;
pub mod graph;
pub mod node;
pub mod source;
pub mod wire;

pub use error::ApiError;
pub use graph::GraphClient;
pub use node::NodeClient;
pub use source::{
    AccessGroupSource, DmWindowQuery, GroupWindowQuery, IndexedSource, MessageFilter,
    MessagePage, MessagesQuery, ThreadBatch, WindowedSource,
};
