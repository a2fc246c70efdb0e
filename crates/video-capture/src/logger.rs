//! Per-session diagnostic sink
//!
//! Every message is emitted as a `tracing` event and, when a callback is
//! registered for its level, forwarded to that callback as well. The sink is
//! owned by one session, so two sessions never share callbacks.

use std::fmt;
use std::sync::Arc;
use tracing::{error, info};
use video_capture_common::LogLevel;

/// Callback receiving one formatted log line
pub type LogCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Logger {
    info_cb: Option<LogCallback>,
    error_cb: Option<LogCallback>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("info_cb", &self.info_cb.is_some())
            .field("error_cb", &self.error_cb.is_some())
            .finish()
    }
}

impl Logger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `cb` for `level`; `LogLevel::All` registers it for both levels
    pub fn set_callback<F>(&mut self, cb: F, level: LogLevel)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let cb: LogCallback = Arc::new(cb);
        match level {
            LogLevel::All => {
                self.info_cb = Some(Arc::clone(&cb));
                self.error_cb = Some(cb);
            }
            LogLevel::Info => self.info_cb = Some(cb),
            LogLevel::Error => self.error_cb = Some(cb),
        }
    }

    pub fn info(&self, message: &str) {
        info!(target: "video_capture", "{message}");
        if let Some(cb) = &self.info_cb {
            cb(message);
        }
    }

    pub fn error(&self, message: &str) {
        error!(target: "video_capture", "{message}");
        if let Some(cb) = &self.error_cb {
            cb(message);
        }
    }
}
