//! Application layer of the server: what happens to a request.
//!
//! # What is the "application" layer? (for beginners)
//!
//! It sits between the domain (settings, the data store) and the
//! infrastructure (sockets, threads).  Code here decides *what* to do with a
//! request but never touches a socket, so every rule can be unit-tested by
//! feeding it bytes.
//!
//! # Sub-modules
//!
//! - **`dispatch`** – Decodes and validates a request frame, looks up the
//!   handler for its command, and produces the single reply plus any work
//!   that must follow the reply.
//!
//! - **`events`** – The callback registry the owning application uses to hear
//!   about `SAVE`, `SET`, `INFO_OPT`, and `GET`.

pub mod dispatch;
pub mod events;
