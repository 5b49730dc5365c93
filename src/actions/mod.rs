//! Normalised phone actions and the two grammars that produce them.

pub mod dsl;
pub mod tool_call;
pub mod types;

pub use dsl::{parse_action, parse_or_finish, split_response, ActionParseError, ThinkingSplitter};
pub use tool_call::tool_call_to_action;
pub use types::{Action, DeviceAction};
