#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "models",
        action: "models",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "image_model",
    action: "set_image_model",
}];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "use",
    action: "set_active_image",
}];

pub(crate) const KEYS_COMMAND: CommandSpec = CommandSpec {
    command: "keys",
    action: "save_keys",
};

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/help",
    "/models",
    "/image_model",
    "/use",
    "/keys",
    "/quit",
];

#[cfg(test)]
mod tests {
    use super::{
        CommandSpec, CHAT_HELP_COMMANDS, KEYS_COMMAND, NO_ARG_COMMANDS, RAW_ARG_COMMANDS,
        SINGLE_PATH_COMMANDS,
    };

    #[test]
    fn every_registered_command_is_advertised_in_help() {
        let registered: Vec<&CommandSpec> = NO_ARG_COMMANDS
            .iter()
            .chain(RAW_ARG_COMMANDS)
            .chain(SINGLE_PATH_COMMANDS)
            .chain(std::iter::once(&KEYS_COMMAND))
            .filter(|spec| spec.command != "exit")
            .collect();
        for spec in registered {
            let slash = format!("/{}", spec.command);
            assert!(
                CHAT_HELP_COMMANDS.contains(&slash.as_str()),
                "missing help entry for {slash}"
            );
        }
    }
}
