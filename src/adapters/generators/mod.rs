//! Generation backends.

pub mod http;
pub mod scripted;

pub use http::HttpGenerator;
pub use scripted::{ScriptedCall, ScriptedGenerator, ScriptedResponse};
