#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

const fn spec(command: &'static str, action: &'static str) -> CommandSpec {
    CommandSpec { command, action }
}

/// Whole remainder is kept verbatim as `text`.
pub(crate) const RAW_TEXT_COMMANDS: &[CommandSpec] = &[
    spec("global", "set_global_prompt"),
    spec("style", "set_style"),
    spec("lora", "set_lora"),
    spec("sampler", "set_sampler"),
    spec("negative", "set_negative_prompt"),
    spec("expand", "expand"),
];

/// Optional numeric `value`.
pub(crate) const NUMBER_COMMANDS: &[CommandSpec] = &[
    spec("count", "set_variant_count"),
    spec("cfg", "set_cfg_scale"),
    spec("steps", "set_steps"),
    spec("generate_all", "generate_all"),
];

/// A single `section` key.
pub(crate) const SECTION_COMMANDS: &[CommandSpec] = &[
    spec("generate", "generate"),
    spec("use_global", "use_global_prompt"),
    spec("status", "status"),
];

/// A `section` key followed by a gallery `index`.
pub(crate) const SECTION_INDEX_COMMANDS: &[CommandSpec] = &[
    spec("regen", "regenerate"),
    spec("discard", "discard"),
    spec("final", "set_final"),
    spec("download", "download"),
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    spec("help", "help"),
    spec("sections", "sections"),
    spec("finals", "finals"),
    spec("loras", "loras"),
    spec("health", "health"),
    spec("quit", "quit"),
    spec("exit", "quit"),
];

pub(crate) const EDIT_COMMAND: CommandSpec = spec("edit", "edit_prompt");
pub(crate) const SIZE_COMMAND: CommandSpec = spec("size", "set_size");
pub(crate) const EXPORT_COMMAND: CommandSpec = spec("export", "export");

pub const SHELL_HELP_COMMANDS: &[&str] = &[
    "/global <prompt>",
    "/style <text>",
    "/lora <name|none>",
    "/count <1-10>",
    "/cfg <scale>",
    "/steps <n>",
    "/sampler <name>",
    "/negative <text>",
    "/edit <section> <prompt>",
    "/use_global <section>",
    "/size <section> <WxH>",
    "/generate <section>",
    "/generate_all [count]",
    "/regen <section> <index>",
    "/discard <section> <index>",
    "/final <section> <index>",
    "/download <section> <index>",
    "/status <section>",
    "/sections",
    "/finals",
    "/export [dir]",
    "/expand [theme]",
    "/loras",
    "/health",
    "/quit",
];
