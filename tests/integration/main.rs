//! Integration tests: full passes against deterministic sources, and the
//! real HTTP clients against a local fake provider.

mod http_clients;
mod pipeline;
