//! Command dispatch: turns one request frame into exactly one reply.
//!
//! [`Dispatcher::dispatch`] runs the per-request pipeline:
//!
//! ```text
//! bytes ──decode_value──► JSON object ──validate_message──► Message
//!                                                              │
//!           capability table lookup (cmd token → handler) ◄────┘
//!                                                              │
//!                  handler: payload check, event, store ───────► Outcome
//! ```
//!
//! Every branch of that pipeline ends in an [`Outcome`] holding a single
//! reply, so the caller always has exactly one frame to send.  Decode and
//! validation failures, unknown commands, and missing payload keys all become
//! error replies; none of them stops the server.
//!
//! Work that must happen *after* the reply is on the wire (the `get` event,
//! the optional store clear, the end of the loop on `STOP`) is described by the
//! outcome's [`FollowUp`] and performed by the caller.

use std::collections::HashMap;
use std::sync::Arc;

use laplace_core::protocol::messages::{DATA_KEY, PATH_KEY, POSITIONS_KEY, UNKNOWN_TOKEN};
use laplace_core::validation::{
    payload_list, payload_str, recover_identity, validate_message, validate_payload,
    ValidationError,
};
use laplace_core::{decode_value, Command, Message};
use tracing::{debug, info, warn};

use crate::application::events::{EventEmitter, Invokable, ServerEvent};
use crate::domain::config::ServerSettings;
use crate::domain::store::DataStore;

/// Work to perform once the reply has been sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    /// Nothing.
    None,
    /// Raise the `get` event, then clear the store if so configured.
    AfterGet,
    /// Leave the loop.
    Stop,
}

/// The reply for one request plus the work that follows it.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub reply: Message,
    pub follow_up: FollowUp,
}

impl Outcome {
    fn reply(reply: Message) -> Self {
        Self {
            reply,
            follow_up: FollowUp::None,
        }
    }
}

/// A command handler.  Must produce exactly one reply.
type Handler = fn(&Dispatcher, &Message) -> Outcome;

/// Maps command tokens to handlers and runs them against the shared state.
pub struct Dispatcher {
    settings: Arc<ServerSettings>,
    store: Arc<DataStore>,
    events: Arc<EventEmitter>,
    handlers: HashMap<Command, Handler>,
}

impl Dispatcher {
    /// Builds the capability table from `settings.capabilities`.
    pub fn new(
        settings: Arc<ServerSettings>,
        store: Arc<DataStore>,
        events: Arc<EventEmitter>,
    ) -> Self {
        let handlers = settings
            .capabilities
            .iter()
            .filter_map(|&cmd| handler_for(cmd).map(|h| (cmd, h)))
            .collect();
        Self {
            settings,
            store,
            events,
            handlers,
        }
    }

    /// Returns `true` if `cmd` has a handler.
    pub fn handles(&self, cmd: Command) -> bool {
        self.handlers.contains_key(&cmd)
    }

    /// Runs the full pipeline for one request frame.
    pub fn dispatch(&self, frame: &[u8]) -> Outcome {
        let value = match decode_value(frame) {
            Ok(value) => value,
            Err(e) => {
                warn!("undecodable request ({} bytes): {e}", frame.len());
                return self.reject(UNKNOWN_TOKEN, UNKNOWN_TOKEN, &e.to_string());
            }
        };

        let request = match validate_message(&value) {
            Ok(msg) => msg,
            Err(e) => {
                let (cmd, from) = recover_identity(&value);
                warn!("invalid {cmd} request from {from}: {e}");
                return self.reject(&cmd, &from, &e.to_string());
            }
        };

        let Some(handler) = request.command().and_then(|c| self.handlers.get(&c)) else {
            warn!("unknown command '{}' from {}", request.cmd, request.from);
            return self.reject(
                &request.cmd,
                &request.from,
                &format!("Unknown command: {}", request.cmd),
            );
        };

        handler(self, &request)
    }

    /// Performs the post-reply part of `follow_up`.
    ///
    /// [`FollowUp::Stop`] is left to the caller, which owns the loop flag.
    pub fn after_reply(&self, follow_up: FollowUp) {
        if follow_up == FollowUp::AfterGet {
            self.events.emit(&ServerEvent::Get);
            if self.settings.empty_data_after_get {
                self.store.clear();
                debug!("data store emptied after GET");
            }
        }
    }

    fn name(&self) -> &str {
        &self.settings.name
    }

    fn reject(&self, cmd: &str, target: &str, error_msg: &str) -> Outcome {
        Outcome::reply(Message::error(self.name(), target, cmd, error_msg))
    }

    fn reject_payload(&self, request: &Message, e: &ValidationError) -> Outcome {
        warn!("{} from {} rejected: {e}", request.cmd, request.from);
        self.reject(&request.cmd, &request.from, &format!("{} {e}", request.cmd))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut commands: Vec<&Command> = self.handlers.keys().collect();
        commands.sort();
        f.debug_struct("Dispatcher")
            .field("name", &self.settings.name)
            .field("commands", &commands)
            .finish()
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

fn handler_for(cmd: Command) -> Option<Handler> {
    let handler: Handler = match cmd {
        Command::Info => handle_info,
        Command::Ping => handle_ping,
        Command::Get => handle_get,
        Command::Save => handle_save,
        Command::Set => handle_set,
        Command::Opt => handle_opt,
        Command::Stop => handle_stop,
        Command::Error => return None,
    };
    Some(handler)
}

fn handle_info(d: &Dispatcher, request: &Message) -> Outcome {
    info!("INFO requested by {}", request.from);
    let s = &d.settings;
    Outcome::reply(Message::info_reply(
        &s.name,
        &request.from,
        s.device,
        s.freedom,
        &s.name,
        &s.capabilities,
    ))
}

fn handle_ping(d: &Dispatcher, request: &Message) -> Outcome {
    debug!("PING from {}", request.from);
    Outcome::reply(Message::pong(d.name(), &request.from))
}

fn handle_get(d: &Dispatcher, request: &Message) -> Outcome {
    debug!("GET from {}", request.from);
    Outcome {
        reply: Message::get_reply(d.name(), &request.from, d.store.get()),
        follow_up: FollowUp::AfterGet,
    }
}

fn handle_save(d: &Dispatcher, request: &Message) -> Outcome {
    let checked = validate_payload(request, &[PATH_KEY]);
    let path = match checked.and_then(|()| payload_str(request, PATH_KEY)) {
        Ok(path) => path,
        Err(e) => return d.reject_payload(request, &e),
    };
    info!("saving path set to '{path}' by {}", request.from);
    d.events.emit(&ServerEvent::SavingPathChanged(path.to_string()));
    Outcome::reply(Message::save_reply(d.name(), &request.from))
}

fn handle_set(d: &Dispatcher, request: &Message) -> Outcome {
    let checked = validate_payload(request, &[POSITIONS_KEY]);
    let positions = match checked.and_then(|()| payload_list(request, POSITIONS_KEY)) {
        Ok(positions) => positions,
        Err(e) => return d.reject_payload(request, &e),
    };
    info!("positions set to {positions:?} by {}", request.from);
    d.events.emit(&ServerEvent::PositionChanged(positions.to_vec()));
    Outcome::reply(Message::set_reply(d.name(), &request.from))
}

fn handle_opt(d: &Dispatcher, request: &Message) -> Outcome {
    if let Err(e) = validate_payload(request, &[DATA_KEY]) {
        return d.reject_payload(request, &e);
    }
    let data = request.payload.get(DATA_KEY).cloned().unwrap_or_default();
    info!("optics data received from {}", request.from);
    d.events.emit(&ServerEvent::OptChanged(data));
    Outcome::reply(Message::opt_reply(d.name(), &request.from))
}

fn handle_stop(d: &Dispatcher, request: &Message) -> Outcome {
    info!("STOP requested by {}", request.from);
    Outcome {
        reply: Message::stop_reply(d.name(), &request.from),
        follow_up: FollowUp::Stop,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
