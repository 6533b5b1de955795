use super::command_registry::{
    CommandSpec, KEYS_COMMAND, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SINGLE_PATH_COMMANDS,
};

/// A slash command typed into the interactive surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Help,
    Models,
    Quit,
    SetImageModel(String),
    UseImage(String),
    SaveKeys { chat: String, image: String },
    Unknown { command: String, arg: String },
}

/// One line of interactive input, before any remote classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Noop,
    Command(ChatCommand),
    Message(String),
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    parse_path_args(arg).join(" ")
}

fn command_for(action: &str, arg: &str) -> ChatCommand {
    match action {
        "help" => ChatCommand::Help,
        "models" => ChatCommand::Models,
        "quit" => ChatCommand::Quit,
        "set_image_model" => ChatCommand::SetImageModel(arg.to_string()),
        "set_active_image" => ChatCommand::UseImage(parse_single_path_arg(arg)),
        _ => ChatCommand::Unknown {
            command: action.to_string(),
            arg: arg.to_string(),
        },
    }
}

pub fn parse_input(text: &str) -> ChatInput {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return ChatInput::Noop;
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS)
                .or_else(|| find_action(&command, RAW_ARG_COMMANDS))
                .or_else(|| find_action(&command, SINGLE_PATH_COMMANDS))
            {
                return ChatInput::Command(command_for(action, arg));
            }

            if command == KEYS_COMMAND.command {
                let mut parts = parse_path_args(arg).into_iter();
                return ChatInput::Command(ChatCommand::SaveKeys {
                    chat: parts.next().unwrap_or_default(),
                    image: parts.next().unwrap_or_default(),
                });
            }

            return ChatInput::Command(ChatCommand::Unknown {
                command,
                arg: arg.to_string(),
            });
        }
    }

    ChatInput::Message(raw_trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::{parse_input, ChatCommand, ChatInput};

    #[test]
    fn blank_lines_are_noops() {
        assert_eq!(parse_input("   \n"), ChatInput::Noop);
    }

    #[test]
    fn plain_text_is_a_message_for_the_classifier() {
        assert_eq!(
            parse_input("  画一张猫 \n"),
            ChatInput::Message("画一张猫".to_string())
        );
        assert_eq!(
            parse_input("/ not a command"),
            ChatInput::Message("/ not a command".to_string())
        );
    }

    #[test]
    fn parse_no_arg_commands_case_insensitively() {
        assert_eq!(parse_input("/HELP"), ChatInput::Command(ChatCommand::Help));
        assert_eq!(parse_input("/models"), ChatInput::Command(ChatCommand::Models));
        assert_eq!(parse_input("/exit"), ChatInput::Command(ChatCommand::Quit));
        assert_eq!(parse_input("/quit"), ChatInput::Command(ChatCommand::Quit));
    }

    #[test]
    fn parse_image_model_keeps_raw_argument() {
        assert_eq!(
            parse_input("/image_model wanx2.1-t2i-plus"),
            ChatInput::Command(ChatCommand::SetImageModel("wanx2.1-t2i-plus".to_string()))
        );
    }

    #[test]
    fn parse_use_accepts_quoted_paths() {
        assert_eq!(
            parse_input("/use \"/tmp/a b.png\""),
            ChatInput::Command(ChatCommand::UseImage("/tmp/a b.png".to_string()))
        );
        assert_eq!(
            parse_input("/use cat.png"),
            ChatInput::Command(ChatCommand::UseImage("cat.png".to_string()))
        );
    }

    #[test]
    fn parse_keys_splits_two_tokens() {
        assert_eq!(
            parse_input("/keys sk-chat sk-image"),
            ChatInput::Command(ChatCommand::SaveKeys {
                chat: "sk-chat".to_string(),
                image: "sk-image".to_string(),
            })
        );
        assert_eq!(
            parse_input("/keys only-chat"),
            ChatInput::Command(ChatCommand::SaveKeys {
                chat: "only-chat".to_string(),
                image: String::new(),
            })
        );
    }

    #[test]
    fn parse_unknown_command() {
        assert_eq!(
            parse_input("/magic foo bar"),
            ChatInput::Command(ChatCommand::Unknown {
                command: "magic".to_string(),
                arg: "foo bar".to_string(),
            })
        );
    }
}
