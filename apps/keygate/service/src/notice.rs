use std::fmt;

use maud::{Markup, html};

const NBSP_ENTITY: &str = "&nbsp;";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
    Info,
}

impl NoticeLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Info => "info",
        }
    }

    /// Unknown levels degrade to `Info` so a notice is never dropped.
    pub fn from_query(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" => Self::Success,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendered replacement for a browser toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, message)
    }

    /// Notice carried by the backend's `?type=..&meg=..` redirect parameters.
    pub fn from_query(level: Option<&str>, message: Option<&str>) -> Option<Self> {
        let level = level.map(str::trim).filter(|value| !value.is_empty())?;
        let message = message
            .map(|value| value.replace(NBSP_ENTITY, " "))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())?;
        Some(Self::new(NoticeLevel::from_query(level), message))
    }
}

pub fn notice_region(notices: &[Notice]) -> Markup {
    html! {
        div id="kg-notices" class="kg-notices" role="status" aria-live="polite" {
            @for notice in notices {
                (notice_markup(notice))
            }
        }
    }
}

pub fn notice_markup(notice: &Notice) -> Markup {
    html! {
        div class={ "kg-notice " (notice.level.as_str()) } data-level=(notice.level.as_str()) {
            (notice.message)
        }
    }
}
