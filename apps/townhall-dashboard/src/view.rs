use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde_json::Value;

use crate::fetch::collection_len;
use crate::section::Section;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Transient message for the user. Never blocks further use of the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub at: DateTime<Local>,
}

impl Notice {
    fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            at: Local::now(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, message)
    }
}

/// Rendering surface driven by the sync manager.
pub trait DashboardView: Send {
    /// Make `section` the visible region and hide the others.
    fn show_section(&mut self, section: Section);
    fn render_section(&mut self, section: Section, body: &Value);
    fn render_summary(&mut self, body: &Value);
    fn notify(&mut self, notice: Notice);
    /// Drop everything rendered so far.
    fn clear(&mut self);
}

/// Headless view that keeps the latest state of every region.
#[derive(Debug, Default)]
pub struct MemoryView {
    visible: Option<Section>,
    sections: BTreeMap<Section, Value>,
    summary: Option<Value>,
    notices: Vec<Notice>,
    renders: usize,
}

impl MemoryView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visible(&self) -> Option<Section> {
        self.visible
    }

    pub fn section(&self, section: Section) -> Option<&Value> {
        self.sections.get(&section)
    }

    pub fn summary(&self) -> Option<&Value> {
        self.summary.as_ref()
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Section and summary renders since the last clear.
    pub fn renders(&self) -> usize {
        self.renders
    }

    pub fn is_blank(&self) -> bool {
        self.visible.is_none() && self.sections.is_empty() && self.summary.is_none()
    }
}

impl DashboardView for MemoryView {
    fn show_section(&mut self, section: Section) {
        self.visible = Some(section);
    }

    fn render_section(&mut self, section: Section, body: &Value) {
        self.sections.insert(section, body.clone());
        self.renders += 1;
    }

    fn render_summary(&mut self, body: &Value) {
        self.summary = Some(body.clone());
        self.renders += 1;
    }

    fn notify(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Line-oriented terminal view.
#[derive(Debug, Default)]
pub struct ConsoleView {
    json: bool,
}

impl ConsoleView {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    fn stamp() -> impl std::fmt::Display {
        Local::now().format("%H:%M:%S")
    }
}

impl DashboardView for ConsoleView {
    fn show_section(&mut self, section: Section) {
        println!("[{}] -> {}", Self::stamp(), section);
    }

    fn render_section(&mut self, section: Section, body: &Value) {
        if self.json {
            println!("{}", serde_json::to_string(body).unwrap_or_else(|_| "{}".into()));
            return;
        }
        match collection_len(section, body) {
            Some(n) => println!("[{}] {} items={}", Self::stamp(), section, n),
            None => println!("[{}] {} updated", Self::stamp(), section),
        }
    }

    fn render_summary(&mut self, body: &Value) {
        if self.json {
            println!("{}", serde_json::to_string(body).unwrap_or_else(|_| "{}".into()));
            return;
        }
        println!("[{}] {}", Self::stamp(), summary_line(body));
    }

    fn notify(&mut self, notice: Notice) {
        let mark = match notice.level {
            NoticeLevel::Info => "i",
            NoticeLevel::Warning => "!",
            NoticeLevel::Error => "x",
        };
        eprintln!("[{}] {} {}", notice.at.format("%H:%M:%S"), mark, notice.message);
    }

    fn clear(&mut self) {
        println!("[{}] signed out", Self::stamp());
    }
}

/// One-line rendering of the dashboard summary payload.
pub fn summary_line(body: &Value) -> String {
    let stats = body.get("statistics").unwrap_or(body);
    let count = |key: &str| stats.get(key).and_then(Value::as_u64).unwrap_or(0);
    let recent = body
        .get("recentActivity")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);
    format!(
        "summary residents={} pending={} sessions={} recent={}",
        count("totalResidents"),
        count("pendingItems"),
        count("activeSessions"),
        recent
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summary_line_reads_statistics() {
        let body = json!({
            "statistics": {"totalResidents": 120, "pendingItems": 4, "activeSessions": 2},
            "recentActivity": [{"id": 1}],
        });
        assert_eq!(
            summary_line(&body),
            "summary residents=120 pending=4 sessions=2 recent=1"
        );
        assert_eq!(
            summary_line(&json!({})),
            "summary residents=0 pending=0 sessions=0 recent=0"
        );
    }

    #[test]
    fn memory_view_clear_forgets_everything() {
        let mut view = MemoryView::new();
        view.show_section(Section::Events);
        view.render_section(Section::Events, &json!({"events": []}));
        view.render_summary(&json!({}));
        view.notify(Notice::error("boom"));
        assert_eq!(view.renders(), 2);
        view.clear();
        assert!(view.is_blank());
        assert!(view.notices().is_empty());
    }
}
