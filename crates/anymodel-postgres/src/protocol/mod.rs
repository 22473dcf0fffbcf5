//! PostgreSQL wire protocol (version 3.0), reduced to the message set the
//! extended query path needs.

pub mod messages;
pub mod reader;

pub use messages::{
    BackendMessage, ErrorFields, FieldDescription, FrontendMessage, MessageWriter,
    PROTOCOL_VERSION,
};
pub use reader::{MessageReader, ProtocolError};
