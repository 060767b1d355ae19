//! Protocol profiles: what a server says and how it answers

use assuan_proto::{AssuanError, ProtoError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::ServerChannel;

/// Greeting used when the profile does not set one
pub const DEFAULT_GREETING: &str = "Pleased to meet you";

/// Outcome of a handler; an error becomes the command's single `ERR` line.
pub type HandlerResult = Result<(), AssuanError>;

/// Outcome of a data handler; the payload is sent as `D` lines before `OK`.
pub type DataResult = Result<Vec<u8>, AssuanError>;

/// Why a stream handler stopped
#[derive(Debug, Error)]
pub enum StreamError {
    /// Sent to the client as the command's `ERR` line
    #[error(transparent)]
    Command(#[from] AssuanError),

    /// The channel is unusable; the session ends without a response
    #[error("Transport failure: {0}")]
    Transport(ProtoError),
}

impl From<ProtoError> for StreamError {
    fn from(err: ProtoError) -> Self {
        if err.is_transport() {
            Self::Transport(err)
        } else {
            Self::Command(AssuanError::from(&err))
        }
    }
}

/// Outcome of a [`StreamHandler`]
pub type StreamResult = Result<(), StreamError>;

pub type StateFactory<S> = Box<dyn Fn() -> S + Send + Sync>;

/// Called with `(state, key, value)` for every well-formed `OPTION`
pub type OptionSetter<S> = Box<dyn Fn(&mut S, &str, &str) -> HandlerResult + Send + Sync>;

pub type PlainFn = Box<dyn Fn(&str) -> DataResult + Send + Sync>;
pub type StateFn<S> = Box<dyn Fn(&mut S, &str) -> HandlerResult + Send + Sync>;
pub type DataFn<S> = Box<dyn Fn(&mut S, &str) -> DataResult + Send + Sync>;

/// A handler that needs the channel itself
///
/// It may write data, status and comment lines, or inquire the client,
/// before returning. It must not write the terminal `OK`/`ERR`. Channel
/// failures propagated with `?` end the session.
#[async_trait]
pub trait StreamHandler<S: Send + 'static>: Send + Sync {
    async fn handle(&self, channel: &mut ServerChannel, state: &mut S, params: &str)
    -> StreamResult;
}

/// Registered command handler, by side-effect shape
pub enum Handler<S: Send + 'static> {
    /// Sees only the parameters; may return a payload.
    Plain(PlainFn),
    /// Mutates the connection state.
    State(StateFn<S>),
    /// Returns a payload for the client.
    Data(DataFn<S>),
    /// Talks to the client directly.
    Stream(Box<dyn StreamHandler<S>>),
}

impl<S: Send + 'static> fmt::Debug for Handler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Plain(_) => "Plain",
            Self::State(_) => "State",
            Self::Data(_) => "Data",
            Self::Stream(_) => "Stream",
        };
        f.write_str(kind)
    }
}

/// Immutable description of a server: greeting, commands, help, state and options
///
/// Built once with [`ProfileBuilder`] and shared read-only by every session.
pub struct Profile<S: Send + 'static> {
    greeting: String,
    handlers: HashMap<String, Handler<S>>,
    help: HashMap<String, Vec<String>>,
    new_state: StateFactory<S>,
    set_option: Option<OptionSetter<S>>,
}

impl<S: Send + 'static> Profile<S> {
    pub fn builder<F>(new_state: F) -> ProfileBuilder<S>
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        ProfileBuilder::new(new_state)
    }

    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    /// Look up a handler by command name (upper case).
    pub fn handler(&self, command: &str) -> Option<&Handler<S>> {
        self.handlers.get(command)
    }

    pub fn help_lines(&self, command: &str) -> Option<&[String]> {
        self.help.get(command).map(Vec::as_slice)
    }

    /// Registered command names, sorted
    pub fn command_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn new_state(&self) -> S {
        (self.new_state)()
    }

    pub fn has_option_setter(&self) -> bool {
        self.set_option.is_some()
    }

    /// Apply an option, or `None` when the profile takes no options.
    pub fn set_option(&self, state: &mut S, key: &str, value: &str) -> Option<HandlerResult> {
        self.set_option.as_ref().map(|f| f(state, key, value))
    }
}

impl<S: Send + 'static> fmt::Debug for Profile<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("greeting", &self.greeting)
            .field("commands", &self.command_names())
            .field("options", &self.has_option_setter())
            .finish()
    }
}

/// Builder for [`Profile`]
pub struct ProfileBuilder<S: Send + 'static> {
    profile: Profile<S>,
}

impl<S: Send + 'static> ProfileBuilder<S> {
    pub fn new<F>(new_state: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        Self {
            profile: Profile {
                greeting: DEFAULT_GREETING.to_string(),
                handlers: HashMap::new(),
                help: HashMap::new(),
                new_state: Box::new(new_state),
                set_option: None,
            },
        }
    }

    pub fn greeting(mut self, greeting: impl Into<String>) -> Self {
        self.profile.greeting = greeting.into();
        self
    }

    /// Register a handler. A later registration of the same name wins.
    pub fn handler(mut self, command: &str, handler: Handler<S>) -> Self {
        self.profile
            .handlers
            .insert(command.to_ascii_uppercase(), handler);
        self
    }

    pub fn plain<F>(self, command: &str, f: F) -> Self
    where
        F: Fn(&str) -> DataResult + Send + Sync + 'static,
    {
        self.handler(command, Handler::Plain(Box::new(f)))
    }

    pub fn state<F>(self, command: &str, f: F) -> Self
    where
        F: Fn(&mut S, &str) -> HandlerResult + Send + Sync + 'static,
    {
        self.handler(command, Handler::State(Box::new(f)))
    }

    pub fn data<F>(self, command: &str, f: F) -> Self
    where
        F: Fn(&mut S, &str) -> DataResult + Send + Sync + 'static,
    {
        self.handler(command, Handler::Data(Box::new(f)))
    }

    pub fn stream<H>(self, command: &str, handler: H) -> Self
    where
        H: StreamHandler<S> + 'static,
    {
        self.handler(command, Handler::Stream(Box::new(handler)))
    }

    /// Help text for `HELP <command>`, one comment line per entry.
    pub fn help<I, L>(mut self, command: &str, lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        self.profile.help.insert(
            command.to_ascii_uppercase(),
            lines.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn option_setter<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut S, &str, &str) -> HandlerResult + Send + Sync + 'static,
    {
        self.profile.set_option = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Profile<S> {
        self.profile
    }
}
