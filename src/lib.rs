//! Social Dispatch: answer aggregation core for a social-posting bot.

pub mod answer;
pub mod config;
pub mod dispatch;
pub mod error;
