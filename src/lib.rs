//! AlertRelay - Alertmanager webhook relay
//!
//! Receives Alertmanager webhook notifications, renders them with per-backend
//! templates, and delivers them to Feishu, Dingding and WeChat Work robots.

pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod logging;
pub mod notification;
pub mod server;
pub mod templates;
