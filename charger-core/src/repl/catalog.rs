//! Charger REPL grammar expressed as a static command tree.
//!
//! The parser walks these nodes directly and the help output reads the usage
//! strings from the same table, so keywords cannot drift apart.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTag {
    Status,
    Help,
    Profile,
    Mode,
    Current,
    Ack,
    Supply,
    Battery,
    Wait,
    Events,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubcommandTag {
    ProfileShow,
    ProfileList,
    ProfileSelect,
    SupplyEnter,
    SupplyOn,
    SupplyOff,
    SupplyExit,
    BatteryInsert,
    BatteryRemove,
    BatteryFault,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChoiceTag {
    ModeCcc,
    ModeCcCv,
    SupplyPreset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueSpec {
    None,
    Duration,
    /// Bare decimal literal.
    Integer,
    /// `key=<integer>` assignment following a choice keyword.
    IntegerAssignment {
        suggestions: &'static [&'static str],
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HelpTopics {
    None,
    Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub tag: CommandTag,
    pub grammar: &'static Node,
    pub help: HelpTopics,
    pub usage: &'static str,
    pub summary: &'static str,
    /// Only meaningful against the simulated battery.
    pub host_only: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Node {
    End,
    OptionalChoice {
        choices: &'static [ChoiceBranch],
        default: Option<DefaultChoice>,
    },
    Subcommands(&'static [SubcommandBranch]),
    /// Required positional value.
    Argument {
        label: &'static str,
        value: ValueSpec,
        next: &'static Node,
    },
    Topic {
        topics: HelpTopics,
        next: &'static Node,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChoiceBranch {
    pub keyword: &'static str,
    pub tag: ChoiceTag,
    pub value: ValueSpec,
    pub next: &'static Node,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DefaultChoice {
    pub tag: ChoiceTag,
    pub next: &'static Node,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubcommandBranch {
    pub name: &'static str,
    pub tag: SubcommandTag,
    pub grammar: &'static Node,
}

const END: Node = Node::End;

const PROFILE_SELECT_GRAMMAR: Node = Node::Argument {
    label: "profile index",
    value: ValueSpec::Integer,
    next: &END,
};

const PROFILE_SUBCOMMANDS: [SubcommandBranch; 3] = [
    SubcommandBranch {
        name: "show",
        tag: SubcommandTag::ProfileShow,
        grammar: &END,
    },
    SubcommandBranch {
        name: "list",
        tag: SubcommandTag::ProfileList,
        grammar: &END,
    },
    SubcommandBranch {
        name: "select",
        tag: SubcommandTag::ProfileSelect,
        grammar: &PROFILE_SELECT_GRAMMAR,
    },
];

const PROFILE_GRAMMAR: Node = Node::Subcommands(&PROFILE_SUBCOMMANDS);

const MODE_CHOICES: [ChoiceBranch; 2] = [
    ChoiceBranch {
        keyword: "ccc",
        tag: ChoiceTag::ModeCcc,
        value: ValueSpec::None,
        next: &END,
    },
    ChoiceBranch {
        keyword: "cccv",
        tag: ChoiceTag::ModeCcCv,
        value: ValueSpec::None,
        next: &END,
    },
];

const MODE_GRAMMAR: Node = Node::OptionalChoice {
    choices: &MODE_CHOICES,
    default: None,
};

const CURRENT_GRAMMAR: Node = Node::Argument {
    label: "milliamps",
    value: ValueSpec::Integer,
    next: &END,
};

const SUPPLY_PRESET_SUGGESTIONS: [&str; 10] = [
    "preset=0", "preset=1", "preset=2", "preset=3", "preset=4", "preset=5", "preset=6",
    "preset=7", "preset=8", "preset=9",
];

const SUPPLY_ENTER_CHOICES: [ChoiceBranch; 1] = [ChoiceBranch {
    keyword: "preset",
    tag: ChoiceTag::SupplyPreset,
    value: ValueSpec::IntegerAssignment {
        suggestions: &SUPPLY_PRESET_SUGGESTIONS,
    },
    next: &END,
}];

const SUPPLY_ENTER_GRAMMAR: Node = Node::OptionalChoice {
    choices: &SUPPLY_ENTER_CHOICES,
    default: None,
};

const SUPPLY_SUBCOMMANDS: [SubcommandBranch; 4] = [
    SubcommandBranch {
        name: "enter",
        tag: SubcommandTag::SupplyEnter,
        grammar: &SUPPLY_ENTER_GRAMMAR,
    },
    SubcommandBranch {
        name: "on",
        tag: SubcommandTag::SupplyOn,
        grammar: &END,
    },
    SubcommandBranch {
        name: "off",
        tag: SubcommandTag::SupplyOff,
        grammar: &END,
    },
    SubcommandBranch {
        name: "exit",
        tag: SubcommandTag::SupplyExit,
        grammar: &END,
    },
];

const SUPPLY_GRAMMAR: Node = Node::Subcommands(&SUPPLY_SUBCOMMANDS);

const BATTERY_INSERT_GRAMMAR: Node = Node::Argument {
    label: "millivolts",
    value: ValueSpec::Integer,
    next: &END,
};

const BATTERY_SUBCOMMANDS: [SubcommandBranch; 3] = [
    SubcommandBranch {
        name: "insert",
        tag: SubcommandTag::BatteryInsert,
        grammar: &BATTERY_INSERT_GRAMMAR,
    },
    SubcommandBranch {
        name: "remove",
        tag: SubcommandTag::BatteryRemove,
        grammar: &END,
    },
    SubcommandBranch {
        name: "fault",
        tag: SubcommandTag::BatteryFault,
        grammar: &END,
    },
];

const BATTERY_GRAMMAR: Node = Node::Subcommands(&BATTERY_SUBCOMMANDS);

const WAIT_GRAMMAR: Node = Node::Argument {
    label: "duration",
    value: ValueSpec::Duration,
    next: &END,
};

const HELP_GRAMMAR: Node = Node::Topic {
    topics: HelpTopics::Commands,
    next: &END,
};

const COMMANDS: [CommandSpec; 10] = [
    CommandSpec {
        name: "status",
        tag: CommandTag::Status,
        grammar: &END,
        help: HelpTopics::None,
        usage: "status",
        summary: "show output, charge state and failures",
        host_only: false,
    },
    CommandSpec {
        name: "help",
        tag: CommandTag::Help,
        grammar: &HELP_GRAMMAR,
        help: HelpTopics::Commands,
        usage: "help [command]",
        summary: "list commands or describe one",
        host_only: false,
    },
    CommandSpec {
        name: "profile",
        tag: CommandTag::Profile,
        grammar: &PROFILE_GRAMMAR,
        help: HelpTopics::None,
        usage: "profile show|list|select <n>",
        summary: "inspect or switch the charge profile",
        host_only: false,
    },
    CommandSpec {
        name: "mode",
        tag: CommandTag::Mode,
        grammar: &MODE_GRAMMAR,
        help: HelpTopics::None,
        usage: "mode ccc|cccv",
        summary: "constant current only, or current then voltage",
        host_only: false,
    },
    CommandSpec {
        name: "current",
        tag: CommandTag::Current,
        grammar: &CURRENT_GRAMMAR,
        help: HelpTopics::None,
        usage: "current <mA>",
        summary: "set the charge current of the active profile",
        host_only: false,
    },
    CommandSpec {
        name: "ack",
        tag: CommandTag::Ack,
        grammar: &END,
        help: HelpTopics::None,
        usage: "ack",
        summary: "acknowledge a battery error or latched failure",
        host_only: false,
    },
    CommandSpec {
        name: "supply",
        tag: CommandTag::Supply,
        grammar: &SUPPLY_GRAMMAR,
        help: HelpTopics::None,
        usage: "supply enter [preset=<n>]|on|off|exit",
        summary: "run as an adjustable power supply",
        host_only: false,
    },
    CommandSpec {
        name: "battery",
        tag: CommandTag::Battery,
        grammar: &BATTERY_GRAMMAR,
        help: HelpTopics::None,
        usage: "battery insert <mV>|remove|fault",
        summary: "change the simulated battery",
        host_only: true,
    },
    CommandSpec {
        name: "wait",
        tag: CommandTag::Wait,
        grammar: &WAIT_GRAMMAR,
        help: HelpTopics::None,
        usage: "wait <duration>",
        summary: "advance simulated time",
        host_only: true,
    },
    CommandSpec {
        name: "events",
        tag: CommandTag::Events,
        grammar: &END,
        help: HelpTopics::None,
        usage: "events",
        summary: "dump recorded telemetry",
        host_only: false,
    },
];

/// Returns the full command catalog.
#[must_use]
pub const fn commands() -> &'static [CommandSpec] {
    &COMMANDS
}

/// Looks up a command by its tag.
#[must_use]
pub fn command(tag: CommandTag) -> &'static CommandSpec {
    match tag {
        CommandTag::Status => &COMMANDS[0],
        CommandTag::Help => &COMMANDS[1],
        CommandTag::Profile => &COMMANDS[2],
        CommandTag::Mode => &COMMANDS[3],
        CommandTag::Current => &COMMANDS[4],
        CommandTag::Ack => &COMMANDS[5],
        CommandTag::Supply => &COMMANDS[6],
        CommandTag::Battery => &COMMANDS[7],
        CommandTag::Wait => &COMMANDS[8],
        CommandTag::Events => &COMMANDS[9],
    }
}

/// Finds a command by name (case insensitive).
#[must_use]
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}
