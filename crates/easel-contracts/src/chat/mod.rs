mod command_parser;
mod command_registry;
mod direction;
mod intent;

pub use command_parser::{parse_input, ChatCommand, ChatInput};
pub use command_registry::CHAT_HELP_COMMANDS;
pub use direction::{EdgeScales, OutpaintDirection};
pub use intent::{Classification, Intent};
