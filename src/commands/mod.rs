//! Command handlers behind the CLI: `send` and `receive` drive the
//! control surface and render its event streams, `serve` runs the
//! rendezvous server in the foreground.

pub mod receive;
pub mod send;
pub mod serve;
