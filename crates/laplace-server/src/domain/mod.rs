//! Domain layer of the server: its settings and its shared state.
//!
//! Nothing in here opens a socket or spawns a thread.
//!
//! - **`config`** – [`ServerConfig`](config::ServerConfig), the raw settings a
//!   user writes, and [`ServerSettings`](config::ServerSettings), the validated
//!   form the server runs with.
//! - **`store`** – [`DataStore`](store::DataStore), the thread-safe map handed
//!   out on `GET`.

pub mod config;
pub mod store;
