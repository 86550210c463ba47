//! Outbound email for feedmail.
//!
//! This module provides:
//! - The `Mailer` seam used by the reconciler
//! - Rendering of one feed item into an email
//! - SMTP delivery through lettre

mod format;
mod smtp;
mod types;

pub use format::{format_item_email, strip_html, FOOTER};
pub use smtp::SmtpMailer;
pub use types::{Mailer, OutgoingMail};
