#![allow(clippy::module_name_repetitions)]

//! Lexer and parser for the charger REPL.
//!
//! `regal` turns a line into a bounded token stream and `winnow` walks the
//! [`catalog`](super::catalog) tree over those tokens to build a [`Command`].

use super::catalog::{
    self, ChoiceBranch, ChoiceTag, CommandTag, DefaultChoice, HelpTopics, Node, SubcommandBranch,
    SubcommandTag, ValueSpec,
};
use crate::instrument::ChargeMode;
use core::fmt;
use core::ops::Range;
use core::time::Duration;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
#[allow(deprecated)]
use winnow::error::ErrorKind;
use winnow::error::{ErrMode, ParserError};
use winnow::prelude::*;
use winnow::stream::Stream;

/// Maximum number of tokens produced per REPL line.
pub const MAX_TOKENS: usize = 32;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

/// Lexical token kinds recognized by the REPL grammar.
#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// Duration literal ending in `ms`, `s`, `m` or `h`.
    #[regex(r"[0-9]+(?:ms|s|m|h)", priority = 2)]
    Duration,
    /// Unsuffixed integer literal.
    #[regex(r"[0-9]+")]
    Integer,
    /// Identifier or keyword (case-insensitive match performed later).
    #[regex(r"[A-Za-z][A-Za-z0-9-]*")]
    Ident,
    /// Equals sign for key/value assignments.
    #[token("=")]
    Equals,
    /// Inline whitespace is ignored.
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    /// End-of-line token (`\r`, `\n`, or `\r\n`).
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    /// Anything the lexer does not recognize.
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// Token emitted by the lexer with a byte span back into the source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    /// Input produced more tokens than the static buffer allows.
    TooManyTokens { processed: usize },
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens { processed } => {
                write!(f, "token buffer exhausted after {processed} items")
            }
            LexError::Engine => write!(f, "lexer engine error"),
        }
    }
}

/// Grammar errors emitted by the parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarErrorKind<'a> {
    UnexpectedToken {
        expected: &'static str,
        found: Option<TokenKind>,
        span: Range<usize>,
    },
    UnexpectedEnd {
        expected: &'static str,
    },
    InvalidInteger {
        span: Range<usize>,
    },
    InvalidDuration {
        span: Range<usize>,
    },
    /// The literal parsed but does not fit the field it targets.
    OutOfRange {
        expected: &'static str,
    },
    InvalidToken {
        span: Range<usize>,
        lexeme: &'a str,
    },
}

impl fmt::Display for GrammarErrorKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarErrorKind::UnexpectedToken {
                expected,
                found,
                span,
            } => write!(f, "expected {expected}, found {found:?} at {span:?}"),
            GrammarErrorKind::UnexpectedEnd { expected } => {
                write!(f, "unexpected end of input, expected {expected}")
            }
            GrammarErrorKind::InvalidInteger { span } => {
                write!(f, "invalid integer literal at {span:?}")
            }
            GrammarErrorKind::InvalidDuration { span } => {
                write!(f, "invalid duration literal at {span:?}")
            }
            GrammarErrorKind::OutOfRange { expected } => {
                write!(f, "{expected} out of range")
            }
            GrammarErrorKind::InvalidToken { span, lexeme } => {
                write!(f, "unsupported token `{lexeme}` at {span:?}")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrammarError<'a> {
    pub kind: GrammarErrorKind<'a>,
}

impl fmt::Display for GrammarError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl<'a> GrammarError<'a> {
    fn unexpected(expected: &'static str, token: Option<&Token<'a>>) -> Self {
        GrammarError {
            kind: match token {
                Some(tok) => GrammarErrorKind::UnexpectedToken {
                    expected,
                    found: Some(tok.kind),
                    span: tok.span.clone(),
                },
                None => GrammarErrorKind::UnexpectedEnd { expected },
            },
        }
    }

    fn invalid_integer(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidInteger {
                span: token.span.clone(),
            },
        }
    }

    fn invalid_duration(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidDuration {
                span: token.span.clone(),
            },
        }
    }

    fn out_of_range(expected: &'static str) -> Self {
        GrammarError {
            kind: GrammarErrorKind::OutOfRange { expected },
        }
    }

    fn invalid_token(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidToken {
                span: token.span.clone(),
                lexeme: token.lexeme,
            },
        }
    }
}

type Input<'src, 'slice> = &'slice [Token<'src>];

#[allow(deprecated)]
impl<'src, 'slice> ParserError<Input<'src, 'slice>> for GrammarError<'src>
where
    'src: 'slice,
{
    fn from_error_kind(input: &Input<'src, 'slice>, _kind: ErrorKind) -> Self {
        GrammarError::unexpected("token", input.first())
    }

    fn append(
        self,
        _input: &Input<'src, 'slice>,
        _token_start: &<Input<'src, 'slice> as Stream>::Checkpoint,
        _kind: ErrorKind,
    ) -> Self {
        self
    }

    fn or(self, other: Self) -> Self {
        other
    }
}

/// Combined lex/parse error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Lex(LexError),
    Grammar(GrammarError<'a>),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => err.fmt(f),
            ParseError::Grammar(err) => err.fmt(f),
        }
    }
}

/// Structured commands produced by the parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Status,
    Help(HelpCommand<'a>),
    Profile(ProfileCommand),
    Mode(ChargeMode),
    Current(u16),
    Ack,
    Supply(SupplyCommand),
    Battery(BatteryCommand),
    Wait(Duration),
    Events,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelpCommand<'a> {
    pub topic: Option<&'a str>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileCommand {
    Show,
    List,
    Select(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupplyCommand {
    Enter { preset: Option<u8> },
    On,
    Off,
    Exit,
}

/// Changes to the simulated battery; only the emulator honours these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatteryCommand {
    Insert { millivolts: u16 },
    Remove,
    Fault,
}

pub(crate) fn parse_tokens_partial<'src, 'slice>(
    tokens: &'slice [Token<'src>],
) -> Result<(Command<'src>, &'slice [Token<'src>]), GrammarError<'src>>
where
    'src: 'slice,
{
    let mut input = tokens;
    match command().parse_next(&mut input) {
        Ok(cmd) => Ok((cmd, input)),
        Err(ErrMode::Backtrack(err) | ErrMode::Cut(err)) => Err(err),
        Err(ErrMode::Incomplete(_)) => Err(GrammarError::unexpected("token", input.first())),
    }
}

/// Tokenize the provided line.
///
/// # Errors
///
/// Returns [`LexError`] when the line does not fit the token buffer.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let compiled = TokenKind::lexer();
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache
        .rebuild(compiled, line)
        .map_err(map_incremental_error)?;
    let mut buffer = TokenBuffer::new();

    for record in cache.tokens() {
        if record.skipped {
            continue;
        }

        let span = record.start..record.end;
        let lexeme = &line[span.clone()];
        push_token(
            &mut buffer,
            Token {
                kind: record.token,
                lexeme,
                span,
            },
        )?;
    }

    if let Some(partial) = partial.filter(|partial| !partial.fragment.is_empty()) {
        let start = partial.start;
        let end = start + partial.fragment.len();
        push_token(
            &mut buffer,
            Token {
                kind: TokenKind::Error,
                lexeme: partial.fragment,
                span: start..end,
            },
        )?;
    }

    Ok(buffer)
}

fn push_token<'a>(buffer: &mut TokenBuffer<'a>, token: Token<'a>) -> Result<(), LexError> {
    buffer.push(token).map_err(|_| LexError::TooManyTokens {
        processed: buffer.len() + 1,
    })
}

fn map_incremental_error(error: IncrementalError) -> LexError {
    match error {
        IncrementalError::TokenOverflow => LexError::TooManyTokens {
            processed: MAX_TOKENS,
        },
        _ => LexError::Engine,
    }
}

/// Parse a REPL command from the provided line.
///
/// # Errors
///
/// Returns [`ParseError`] for unknown tokens, unknown commands, or arguments
/// that do not match the command's grammar.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let tokens = lex(line).map_err(ParseError::Lex)?;

    if let Some(token) = tokens.iter().find(|token| token.kind == TokenKind::Error) {
        return Err(ParseError::Grammar(GrammarError::invalid_token(token)));
    }

    let (command, mut rest) =
        parse_tokens_partial(tokens.as_slice()).map_err(ParseError::Grammar)?;

    while let Some((token, remaining)) = rest.split_first() {
        if token.kind == TokenKind::Eol {
            rest = remaining;
        } else {
            return Err(ParseError::Grammar(GrammarError::unexpected(
                "end of command",
                Some(token),
            )));
        }
    }

    Ok(command)
}

fn command<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, Command<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let snapshot = *input;
        let command_token = expect_kind(TokenKind::Ident, "command keyword").parse_next(input)?;

        if let Some(spec) = catalog::find(command_token.lexeme) {
            let mut state = CommandState::new(spec.tag);
            parse_node(spec.grammar, input, &mut state)?;
            state.finish()
        } else {
            *input = snapshot;
            Err(ErrMode::Backtrack(GrammarError::unexpected(
                "command keyword",
                Some(&command_token),
            )))
        }
    }
}

fn parse_node<'src, 'slice>(
    node: &'static Node,
    input: &mut Input<'src, 'slice>,
    state: &mut CommandState<'src>,
) -> Result<(), ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    match node {
        Node::End => Ok(()),
        Node::OptionalChoice { choices, default } => {
            parse_optional_choice(input, choices, *default, state)
        }
        Node::Subcommands(branches) => parse_subcommands(input, branches, state),
        Node::Argument { label, value, next } => {
            let parsed = parse_value(input, *value, label)?;
            state.apply_argument(parsed)?;
            parse_node(next, input, state)
        }
        Node::Topic { topics, next } => {
            parse_topic(*topics, input, state)?;
            parse_node(next, input, state)
        }
    }
}

fn parse_optional_choice<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
    choices: &'static [ChoiceBranch],
    default: Option<DefaultChoice>,
    state: &mut CommandState<'src>,
) -> Result<(), ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    match input.split_first() {
        Some((token, rest)) if token.kind == TokenKind::Ident => {
            if let Some(branch) = find_choice(choices, token.lexeme) {
                *input = rest;
                parse_choice_branch(input, branch, state)
            } else {
                Err(ErrMode::Backtrack(GrammarError::unexpected(
                    choice_expected_label(choices),
                    Some(token),
                )))
            }
        }
        Some((token, _)) if token.kind != TokenKind::Eol => Err(ErrMode::Backtrack(
            GrammarError::unexpected(choice_expected_label(choices), Some(token)),
        )),
        _ => match default {
            Some(default_choice) => {
                state.apply_default_choice(default_choice.tag)?;
                parse_node(default_choice.next, input, state)
            }
            None => Ok(()),
        },
    }
}

fn parse_choice_branch<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
    branch: &'static ChoiceBranch,
    state: &mut CommandState<'src>,
) -> Result<(), ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    let value = parse_value(input, branch.value, branch.keyword)?;
    state.apply_choice(branch.tag, value)?;
    parse_node(branch.next, input, state)
}

fn parse_subcommands<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
    branches: &'static [SubcommandBranch],
    state: &mut CommandState<'src>,
) -> Result<(), ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    let expected = branches.first().map_or("subcommand", |branch| branch.name);

    match input.split_first() {
        Some((token, rest)) if token.kind == TokenKind::Ident => {
            if let Some(branch) = branches
                .iter()
                .find(|candidate| candidate.name.eq_ignore_ascii_case(token.lexeme))
            {
                *input = rest;
                state.set_subcommand(branch.tag);
                parse_node(branch.grammar, input, state)
            } else {
                Err(ErrMode::Backtrack(GrammarError::unexpected(
                    expected,
                    Some(token),
                )))
            }
        }
        Some((token, _)) => Err(ErrMode::Backtrack(GrammarError::unexpected(
            expected,
            Some(token),
        ))),
        None => Err(ErrMode::Backtrack(GrammarError::unexpected(expected, None))),
    }
}

fn parse_topic<'src, 'slice>(
    _topics: HelpTopics,
    input: &mut Input<'src, 'slice>,
    state: &mut CommandState<'src>,
) -> Result<(), ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    state.set_topic(None);

    match input.split_first() {
        Some((token, rest)) if token.kind == TokenKind::Ident => {
            state.set_topic(Some(token.lexeme));
            *input = rest;
            Ok(())
        }
        Some((token, _)) if token.kind != TokenKind::Eol => Err(ErrMode::Backtrack(
            GrammarError::unexpected("identifier", Some(token)),
        )),
        _ => Ok(()),
    }
}

fn parse_value<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
    spec: ValueSpec,
    label: &'static str,
) -> Result<ChoiceValue, ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    match spec {
        ValueSpec::None => Ok(ChoiceValue::None),
        ValueSpec::Duration => {
            let duration_token = expect_kind(TokenKind::Duration, label).parse_next(input)?;
            let duration = parse_duration(&duration_token).map_err(ErrMode::Cut)?;
            Ok(ChoiceValue::Duration(duration))
        }
        ValueSpec::Integer => {
            let integer_token = expect_kind(TokenKind::Integer, label).parse_next(input)?;
            let value = parse_integer(&integer_token).map_err(ErrMode::Cut)?;
            Ok(ChoiceValue::Integer(value))
        }
        ValueSpec::IntegerAssignment { .. } => {
            let _ = expect_kind(TokenKind::Equals, "=").parse_next(input)?;
            let integer_token = expect_kind(TokenKind::Integer, "integer").parse_next(input)?;
            let value = parse_integer(&integer_token).map_err(ErrMode::Cut)?;
            Ok(ChoiceValue::Integer(value))
        }
    }
}

fn find_choice(choices: &'static [ChoiceBranch], lexeme: &str) -> Option<&'static ChoiceBranch> {
    choices
        .iter()
        .find(|choice| choice.keyword.eq_ignore_ascii_case(lexeme))
}

fn choice_expected_label(choices: &'static [ChoiceBranch]) -> &'static str {
    choices.first().map_or("keyword", |choice| choice.keyword)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChoiceValue {
    None,
    Duration(Duration),
    Integer(u32),
}

fn narrow<'a, T: TryFrom<u32>>(
    value: u32,
    expected: &'static str,
) -> Result<T, ErrMode<GrammarError<'a>>> {
    T::try_from(value).map_err(|_| ErrMode::Cut(GrammarError::out_of_range(expected)))
}

enum CommandState<'a> {
    Status,
    Help {
        topic: Option<&'a str>,
    },
    Profile {
        subcommand: Option<SubcommandTag>,
        index: Option<u8>,
    },
    Mode {
        mode: Option<ChargeMode>,
    },
    Current {
        milliamps: Option<u16>,
    },
    Ack,
    Supply {
        subcommand: Option<SubcommandTag>,
        preset: Option<u8>,
    },
    Battery {
        subcommand: Option<SubcommandTag>,
        millivolts: Option<u16>,
    },
    Wait {
        duration: Option<Duration>,
    },
    Events,
}

impl<'a> CommandState<'a> {
    fn new(tag: CommandTag) -> Self {
        match tag {
            CommandTag::Status => CommandState::Status,
            CommandTag::Help => CommandState::Help { topic: None },
            CommandTag::Profile => CommandState::Profile {
                subcommand: None,
                index: None,
            },
            CommandTag::Mode => CommandState::Mode { mode: None },
            CommandTag::Current => CommandState::Current { milliamps: None },
            CommandTag::Ack => CommandState::Ack,
            CommandTag::Supply => CommandState::Supply {
                subcommand: None,
                preset: None,
            },
            CommandTag::Battery => CommandState::Battery {
                subcommand: None,
                millivolts: None,
            },
            CommandTag::Wait => CommandState::Wait { duration: None },
            CommandTag::Events => CommandState::Events,
        }
    }

    fn apply_choice(
        &mut self,
        tag: ChoiceTag,
        value: ChoiceValue,
    ) -> Result<(), ErrMode<GrammarError<'a>>> {
        match (self, tag, value) {
            (CommandState::Mode { mode }, ChoiceTag::ModeCcc, _) => {
                *mode = Some(ChargeMode::Ccc);
                Ok(())
            }
            (CommandState::Mode { mode }, ChoiceTag::ModeCcCv, _) => {
                *mode = Some(ChargeMode::CcCv);
                Ok(())
            }
            (
                CommandState::Supply { preset, .. },
                ChoiceTag::SupplyPreset,
                ChoiceValue::Integer(value),
            ) => {
                *preset = Some(narrow(value, "preset")?);
                Ok(())
            }
            _ => Err(ErrMode::Backtrack(GrammarError::unexpected("choice", None))),
        }
    }

    fn apply_default_choice(&mut self, tag: ChoiceTag) -> Result<(), ErrMode<GrammarError<'a>>> {
        self.apply_choice(tag, ChoiceValue::None)
    }

    fn apply_argument(&mut self, value: ChoiceValue) -> Result<(), ErrMode<GrammarError<'a>>> {
        match (self, value) {
            (CommandState::Profile { index, .. }, ChoiceValue::Integer(value)) => {
                *index = Some(narrow(value, "profile index")?);
                Ok(())
            }
            (CommandState::Current { milliamps }, ChoiceValue::Integer(value)) => {
                *milliamps = Some(narrow(value, "milliamps")?);
                Ok(())
            }
            (CommandState::Battery { millivolts, .. }, ChoiceValue::Integer(value)) => {
                *millivolts = Some(narrow(value, "millivolts")?);
                Ok(())
            }
            (CommandState::Wait { duration }, ChoiceValue::Duration(value)) => {
                *duration = Some(value);
                Ok(())
            }
            _ => Err(ErrMode::Backtrack(GrammarError::unexpected("argument", None))),
        }
    }

    fn set_subcommand(&mut self, tag: SubcommandTag) {
        match self {
            CommandState::Profile { subcommand, .. }
            | CommandState::Supply { subcommand, .. }
            | CommandState::Battery { subcommand, .. } => *subcommand = Some(tag),
            _ => unreachable!("subcommands only apply to profile, supply and battery"),
        }
    }

    fn set_topic(&mut self, topic: Option<&'a str>) {
        if let CommandState::Help { topic: slot } = self {
            *slot = topic;
        }
    }

    fn expected_label(&self) -> &'static str {
        match self {
            CommandState::Profile { .. } => "profile subcommand",
            CommandState::Mode { .. } => "ccc or cccv",
            CommandState::Current { .. } => "milliamps",
            CommandState::Supply { .. } => "supply subcommand",
            CommandState::Battery { .. } => "battery subcommand",
            CommandState::Wait { .. } => "duration",
            CommandState::Status
            | CommandState::Help { .. }
            | CommandState::Ack
            | CommandState::Events => "end of command",
        }
    }

    fn finish(self) -> Result<Command<'a>, ErrMode<GrammarError<'a>>> {
        let expected = self.expected_label();
        let command = match self {
            CommandState::Status => Some(Command::Status),
            CommandState::Help { topic } => Some(Command::Help(HelpCommand { topic })),
            CommandState::Profile {
                subcommand: Some(SubcommandTag::ProfileShow),
                ..
            } => Some(Command::Profile(ProfileCommand::Show)),
            CommandState::Profile {
                subcommand: Some(SubcommandTag::ProfileList),
                ..
            } => Some(Command::Profile(ProfileCommand::List)),
            CommandState::Profile {
                subcommand: Some(SubcommandTag::ProfileSelect),
                index: Some(index),
            } => Some(Command::Profile(ProfileCommand::Select(index))),
            CommandState::Mode { mode } => mode.map(Command::Mode),
            CommandState::Current { milliamps } => milliamps.map(Command::Current),
            CommandState::Ack => Some(Command::Ack),
            CommandState::Supply {
                subcommand: Some(tag),
                preset,
            } => supply_command(tag, preset).map(Command::Supply),
            CommandState::Battery {
                subcommand: Some(tag),
                millivolts,
            } => battery_command(tag, millivolts).map(Command::Battery),
            CommandState::Wait { duration } => duration.map(Command::Wait),
            CommandState::Events => Some(Command::Events),
            CommandState::Profile { .. }
            | CommandState::Supply { .. }
            | CommandState::Battery { .. } => None,
        };

        command.ok_or_else(|| ErrMode::Backtrack(GrammarError::unexpected(expected, None)))
    }
}

fn supply_command(tag: SubcommandTag, preset: Option<u8>) -> Option<SupplyCommand> {
    match tag {
        SubcommandTag::SupplyEnter => Some(SupplyCommand::Enter { preset }),
        SubcommandTag::SupplyOn => Some(SupplyCommand::On),
        SubcommandTag::SupplyOff => Some(SupplyCommand::Off),
        SubcommandTag::SupplyExit => Some(SupplyCommand::Exit),
        _ => None,
    }
}

fn battery_command(tag: SubcommandTag, millivolts: Option<u16>) -> Option<BatteryCommand> {
    match (tag, millivolts) {
        (SubcommandTag::BatteryInsert, Some(millivolts)) => {
            Some(BatteryCommand::Insert { millivolts })
        }
        (SubcommandTag::BatteryRemove, _) => Some(BatteryCommand::Remove),
        (SubcommandTag::BatteryFault, _) => Some(BatteryCommand::Fault),
        _ => None,
    }
}

fn expect_kind<'src, 'slice>(
    kind: TokenKind,
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(token.clone())
        }
        Some((token, _)) => Err(ErrMode::Backtrack(GrammarError::unexpected(
            label,
            Some(token),
        ))),
        None => Err(ErrMode::Backtrack(GrammarError::unexpected(label, None))),
    }
}

fn parse_integer<'a>(token: &Token<'a>) -> Result<u32, GrammarError<'a>> {
    token
        .lexeme
        .parse::<u32>()
        .map_err(|_| GrammarError::invalid_integer(token))
}

fn parse_duration<'a>(token: &Token<'a>) -> Result<Duration, GrammarError<'a>> {
    let text = token.lexeme;
    if let Some(rest) = text.strip_suffix("ms") {
        let millis = rest
            .parse::<u32>()
            .map_err(|_| GrammarError::invalid_duration(token))?;
        Ok(Duration::from_millis(millis.into()))
    } else if let Some((rest, unit)) = text.split_at_checked(text.len().saturating_sub(1)) {
        let scale = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            _ => return Err(GrammarError::invalid_duration(token)),
        };
        let count = rest
            .parse::<u32>()
            .map_err(|_| GrammarError::invalid_duration(token))?;
        Ok(Duration::from_secs(u64::from(count) * scale))
    } else {
        Err(GrammarError::invalid_duration(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Command<'_> {
        parse(input).expect("command should parse")
    }

    fn grammar_error(input: &str) -> GrammarErrorKind<'_> {
        match parse(input) {
            Err(ParseError::Grammar(err)) => err.kind,
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn parses_bare_commands() {
        assert_eq!(parse_ok("status"), Command::Status);
        assert_eq!(parse_ok("ack\r\n"), Command::Ack);
        assert_eq!(parse_ok("events"), Command::Events);
    }

    #[test]
    fn parses_profile_subcommands() {
        assert_eq!(
            parse_ok("profile show"),
            Command::Profile(ProfileCommand::Show)
        );
        assert_eq!(
            parse_ok("profile list"),
            Command::Profile(ProfileCommand::List)
        );
        assert_eq!(
            parse_ok("profile select 3"),
            Command::Profile(ProfileCommand::Select(3))
        );
    }

    #[test]
    fn profile_select_requires_an_index() {
        assert_eq!(
            grammar_error("profile select"),
            GrammarErrorKind::UnexpectedEnd {
                expected: "profile index"
            }
        );
        assert_eq!(
            grammar_error("profile select 300"),
            GrammarErrorKind::OutOfRange {
                expected: "profile index"
            }
        );
    }

    #[test]
    fn parses_charge_mode() {
        assert_eq!(parse_ok("mode ccc"), Command::Mode(ChargeMode::Ccc));
        assert_eq!(parse_ok("mode CCCV"), Command::Mode(ChargeMode::CcCv));
        assert_eq!(
            grammar_error("mode"),
            GrammarErrorKind::UnexpectedEnd {
                expected: "ccc or cccv"
            }
        );
    }

    #[test]
    fn parses_charge_current() {
        assert_eq!(parse_ok("current 1500"), Command::Current(1_500));
        assert_eq!(
            grammar_error("current 70000"),
            GrammarErrorKind::OutOfRange {
                expected: "milliamps"
            }
        );
    }

    #[test]
    fn parses_supply_variants() {
        assert_eq!(
            parse_ok("supply enter"),
            Command::Supply(SupplyCommand::Enter { preset: None })
        );
        assert_eq!(
            parse_ok("supply enter preset=4"),
            Command::Supply(SupplyCommand::Enter { preset: Some(4) })
        );
        assert_eq!(parse_ok("supply on"), Command::Supply(SupplyCommand::On));
        assert_eq!(parse_ok("supply off"), Command::Supply(SupplyCommand::Off));
        assert_eq!(parse_ok("supply exit"), Command::Supply(SupplyCommand::Exit));
    }

    #[test]
    fn parses_battery_and_wait() {
        assert_eq!(
            parse_ok("battery insert 3800"),
            Command::Battery(BatteryCommand::Insert { millivolts: 3_800 })
        );
        assert_eq!(
            parse_ok("battery remove"),
            Command::Battery(BatteryCommand::Remove)
        );
        assert_eq!(parse_ok("wait 250ms"), Command::Wait(Duration::from_millis(250)));
        assert_eq!(parse_ok("wait 2s"), Command::Wait(Duration::from_secs(2)));
        assert_eq!(parse_ok("wait 30m"), Command::Wait(Duration::from_secs(1_800)));
        assert_eq!(parse_ok("wait 2h"), Command::Wait(Duration::from_secs(7_200)));
    }

    #[test]
    fn parses_help_topic() {
        assert_eq!(
            parse_ok("help supply"),
            Command::Help(HelpCommand {
                topic: Some("supply"),
            })
        );
        assert_eq!(parse_ok("help"), Command::Help(HelpCommand { topic: None }));
    }

    #[test]
    fn rejects_trailing_tokens() {
        assert!(matches!(
            grammar_error("status now"),
            GrammarErrorKind::UnexpectedToken {
                expected: "end of command",
                ..
            }
        ));
    }

    #[test]
    fn rejects_invalid_token() {
        assert!(matches!(
            grammar_error("current 100$"),
            GrammarErrorKind::InvalidToken { lexeme: "$", .. }
        ));
    }

    #[test]
    fn option_and_list_punctuation_is_not_part_of_the_language() {
        assert!(matches!(
            grammar_error("profile select 1,2"),
            GrammarErrorKind::InvalidToken { lexeme: ",", .. }
        ));
        assert!(matches!(
            grammar_error("supply enter --preset"),
            GrammarErrorKind::InvalidToken { lexeme: "-", .. }
        ));
    }

    #[test]
    fn supports_case_insensitive_keywords() {
        assert_eq!(
            parse_ok("PrOfIlE SeLeCt 1"),
            Command::Profile(ProfileCommand::Select(1))
        );
    }
}
