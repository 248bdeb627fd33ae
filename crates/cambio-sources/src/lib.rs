//! Cambio Sources - concrete external data sources.
//!
//! Each source plugs its fetch/parse/validate/transform and fallback
//! behavior into the shared orchestration of `cambio-resilience`:
//! - [`official`]: central-bank USD/EUR reference rates scraped from HTML
//! - [`p2p`]: USDT offers from a peer-to-peer advertisement API
//! - [`chat`]: the AI assistant's chat-completion call
//!
//! All sources degrade gracefully: on failure the result envelope carries a
//! last-known-good or static payload labeled as such, so the UI shows stale
//! data with an indicator instead of an error screen.

// chat module - resilient chat-completion calls
pub mod chat;

// fallback module - last-known-good storage
pub mod fallback;

// official module - central-bank reference rates
pub mod official;

// p2p module - peer-to-peer market rates
pub mod p2p;

// transport module - reqwest error mapping (crate-internal)
mod transport;

pub use chat::{ChatAssistant, ChatMessage, ChatReply, ChatRequest, ChatTransport, HttpChatTransport};
pub use fallback::LastKnownGood;
pub use official::{OfficialRates, OfficialRatesAdapter, official_rates_source};
pub use p2p::{P2pRates, P2pRatesAdapter, RateStats, p2p_rates_source};
