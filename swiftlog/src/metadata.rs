//! Static per-call-site record descriptors
//!
//! Every record on the wire references one `&'static EventMetadata`. The
//! descriptor's address is the wire identity, so decoding is a pointer
//! round-trip rather than a registry lookup.

use crate::levels::LogLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Log,
    Flush,
    InitBacktrace,
    FlushBacktrace,
}

#[derive(Debug)]
pub struct EventMetadata {
    pub kind: EventKind,
    pub level: LogLevel,
    /// Message template with `{}` / `{name}` placeholders.
    pub format: &'static str,
    pub target: &'static str,
    pub file: &'static str,
    pub line: u32,
    pub has_named_args: bool,
}

impl EventMetadata {
    pub const fn new(
        kind: EventKind,
        level: LogLevel,
        format: &'static str,
        target: &'static str,
        file: &'static str,
        line: u32,
        has_named_args: bool,
    ) -> Self {
        Self {
            kind,
            level,
            format,
            target,
            file,
            line,
            has_named_args,
        }
    }

    /// `file.rs:line`, used in formatting diagnostics and pattern tokens.
    pub fn short_source_location(&self) -> String {
        let file = self
            .file
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.file);
        format!("{}:{}", file, self.line)
    }

    pub fn as_wire_id(&'static self) -> usize {
        self as *const EventMetadata as usize
    }

    /// # Safety
    /// `id` must come from [`Self::as_wire_id`] of a descriptor in this
    /// process.
    pub unsafe fn from_wire_id(id: usize) -> &'static EventMetadata {
        &*(id as *const EventMetadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static METADATA: EventMetadata = EventMetadata::new(
        EventKind::Log,
        LogLevel::Info,
        "value={}",
        module_path!(),
        file!(),
        line!(),
        false,
    );

    #[test]
    fn test_wire_id_round_trip() {
        let id = METADATA.as_wire_id();
        let back = unsafe { EventMetadata::from_wire_id(id) };
        assert!(std::ptr::eq(back, &METADATA));
        assert_eq!(back.format, "value={}");
    }

    #[test]
    fn test_short_source_location() {
        assert!(METADATA.short_source_location().starts_with("metadata.rs:"));
    }
}
