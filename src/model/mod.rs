//! Runtime instances: datatype values, segments and the message tree.

pub mod arena;
pub mod datatype;
pub mod message;
pub mod segment;

pub use arena::NodeId;
pub use datatype::{Composite, Primitive, Value};
pub use message::Message;
pub use segment::Segment;
