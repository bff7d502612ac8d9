//! Lark / Feishu delivery for kbwatch run reports.
//!
//! Reports are rendered as an interactive card and posted to a custom-bot
//! webhook. With app credentials, screenshots are first uploaded through the
//! open API so the card can embed them.

pub mod card;
pub mod client;
pub mod config;
pub mod error;
pub mod notifier;

pub use card::{build_card, CardOptions, MAX_CARD_ITEMS};
pub use client::LarkClient;
pub use config::{LarkConfig, FEISHU_API_BASE, LARK_API_BASE};
pub use error::LarkError;
pub use notifier::LarkNotifier;
