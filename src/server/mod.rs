//! HTTP surface of the relay
//!
//! | Path | Method | Behavior |
//! |---|---|---|
//! | `/all.mp3` | GET | attach a listener, or `301` to the fallback relay when full |
//! | `/all.mp3` | HEAD | same admission check without taking a slot |
//! | `/` | any | JSON status report |
//! | `/crossdomain.xml` | any | static policy file |
//! | anything else | any | empty `200` |

pub mod config;
pub mod gateway;
pub mod listener;

pub use config::RelayConfig;
pub use gateway::{client_addr, router, STREAM_PATH};
pub use listener::RelayServer;
