//! # `pastid-server`: Paste Service and Expiry Worker
//!
//! HTTP front end and deletion worker built on [`pastid`].
//!
//! ## Binaries
//!
//! - `pastid-server` serves the HTTP API, keeps the identifier pool topped up
//!   in the background and schedules deletion of durable posts.
//! - `pastid-worker` consumes due deletion jobs and removes expired posts.
//!
//! ## HTTP API
//!
//! - `GET /generate-hash` returns `{"hash": "<identifier>"}`.
//! - `POST /create_post` with `{"text", "ttl"}` returns `{"short_url"}`.
//! - `GET /{hash}` returns `{"text"}` or 404.
//! - `GET /healthz` reports the state of the background refill task.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin pastid-server -- --in-memory
//! ```
//!
//! With `--in-memory` every backend lives in the server process, including
//! the delay queue and its consumer, so no worker is needed.

pub mod server;
