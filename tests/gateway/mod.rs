//! Gateway tests against a running hub.

mod events;
mod handshake;
mod lifecycle;
mod messaging;
