//! Reading and writing the persisted run log.
//!
//! The log is append-only. Each executed step contributes a line
//! `short_desc:epoch_secs:flags:sanitized_note` followed by a line
//! `:state_dump` holding the world-state after the step. Reading the log
//! back recovers the last simulated state and the identifiers of the steps
//! already run, which is all a resumed session needs.

use crate::attributes::AttributeSet;
use std::fmt;
use std::io;

/// Outcome markers recorded for an executed step.
///
/// Rendered as a compact string: `s` script executed, `f` failure, `F`
/// failure raised through the external editor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunFlags {
    pub script_run: bool,
    pub failed: bool,
    pub failed_in_editor: bool,
}

impl RunFlags {
    pub fn succeeded(self) -> bool {
        !self.failed && !self.failed_in_editor
    }

    fn parse(text: &str) -> RunFlags {
        let mut flags = RunFlags::default();
        for ch in text.chars() {
            match ch {
                's' => flags.script_run = true,
                'f' => flags.failed = true,
                'F' => flags.failed_in_editor = true,
                other => tracing::warn!(flag = %other, "unknown run-log flag"),
            }
        }
        flags
    }
}

impl fmt::Display for RunFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.script_run {
            write!(f, "s")?;
        }
        if self.failed {
            write!(f, "f")?;
        }
        if self.failed_in_editor {
            write!(f, "F")?;
        }
        Ok(())
    }
}

/// One executed step as recorded in the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub short: String,
    pub at: u64,
    pub flags: RunFlags,
    pub note: String,
}

/// Escape a note for single-line storage.
pub fn sanitize(text: &str) -> String {
    text.replace('\n', "\\n").replace('\t', "\\t")
}

/// Undo [`sanitize`].
pub fn restore(text: &str) -> String {
    text.replace("\\n", "\n").replace("\\t", "\t")
}

/// Append one entry and the state reached after it.
pub fn write_entry<W: io::Write>(w: &mut W, entry: &LogEntry, state: &AttributeSet) -> io::Result<()> {
    writeln!(
        w,
        "{}:{}:{}:{}",
        entry.short,
        entry.at,
        entry.flags,
        sanitize(&entry.note)
    )?;
    writeln!(w, ":{state}")
}

/// Everything a resumed session recovers from a log.
#[derive(Clone, Debug, Default)]
pub struct Resume {
    /// The last recorded state dump.
    pub state: AttributeSet,
    pub entries: Vec<LogEntry>,
}

impl Resume {
    /// Identifiers of the steps that ran without a failure flag.
    pub fn completed(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|entry| entry.flags.succeeded())
            .map(|entry| entry.short.as_str())
    }
}

/// Parse a run log. Malformed lines are reported and skipped; the log is a
/// collaborator artefact and resuming from a partial one beats refusing to.
pub fn parse_log(text: &str) -> Resume {
    let mut resume = Resume::default();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        if let Some(dump) = line.strip_prefix(':') {
            match dump.parse() {
                Ok(state) => resume.state = state,
                Err(error) => tracing::warn!(%error, line, "skipping malformed state dump"),
            }
            continue;
        }
        let mut parts = line.splitn(4, ':');
        let (Some(short), Some(at), Some(flags), Some(note)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            tracing::warn!(line, "skipping malformed run-log line");
            continue;
        };
        let Ok(at) = at.parse() else {
            tracing::warn!(line, "skipping run-log line with a bad timestamp");
            continue;
        };
        resume.entries.push(LogEntry {
            short: short.to_string(),
            at,
            flags: RunFlags::parse(flags),
            note: restore(note),
        });
    }
    resume
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_round_trip() {
        let note = "line one\nline two\twith tab";
        let clean = sanitize(note);
        assert!(!clean.contains('\n'));
        assert!(!clean.contains('\t'));
        assert_eq!(note, restore(&clean));
    }

    #[test]
    fn entry_format() {
        let entry = LogEntry {
            short: "install".to_string(),
            at: 1438819200,
            flags: RunFlags {
                script_run: true,
                ..RunFlags::default()
            },
            note: "took a\nwhile".to_string(),
        };
        let state: AttributeSet = "installed,onaccess".parse().unwrap();
        let mut out = Vec::new();
        write_entry(&mut out, &entry, &state).unwrap();
        assert_eq!(
            "install:1438819200:s:took a\\nwhile\n:installed,onaccess\n",
            String::from_utf8(out).unwrap()
        );
    }

    #[test]
    fn resume_recovers_the_last_state_and_completed_steps() {
        let log = "install:100:s:\n\
                   :installed,onaccess\n\
                   dropEicar:160::\n\
                   :haveEicar,installed,onaccess\n\
                   accessDenied:200:f:file was readable\n\
                   :haveEicar,installed,onaccess\n";
        let resume = parse_log(log);
        assert_eq!(
            "haveEicar,installed,onaccess".parse::<AttributeSet>().unwrap(),
            resume.state
        );
        assert_eq!(3, resume.entries.len());
        let completed: Vec<&str> = resume.completed().collect();
        assert_eq!(vec!["install", "dropEicar"], completed);
        assert_eq!("file was readable", resume.entries[2].note);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let log = "not a log line\n\
                   ok:nan:s:note\n\
                   good:10::\n\
                   :a,b\n";
        let resume = parse_log(log);
        assert_eq!(1, resume.entries.len());
        assert_eq!("good", resume.entries[0].short);
        assert_eq!("a,b".parse::<AttributeSet>().unwrap(), resume.state);
    }

    #[test]
    fn entries_round_trip_through_the_log() {
        let entry = LogEntry {
            short: "check".to_string(),
            at: 42,
            flags: RunFlags {
                script_run: true,
                failed: true,
                ..RunFlags::default()
            },
            note: "multi\nline".to_string(),
        };
        let state: AttributeSet = "a=1,!b".parse().unwrap();
        let mut out = Vec::new();
        write_entry(&mut out, &entry, &state).unwrap();
        let resume = parse_log(std::str::from_utf8(&out).unwrap());
        assert_eq!(vec![entry], resume.entries);
        assert_eq!(state, resume.state);
    }
}
