//! Per-line aggregation of diagnostics and targets during a build

use std::sync::Mutex;

use super::targets::TargetCollector;
use crate::classify::{self, Dialect};
use crate::executor::{LineObserver, Stream};
use crate::records::{BuildTarget, Diagnostic, DiagnosticKind};

/// Everything extracted from one build's output
#[derive(Debug, Default)]
pub struct Collected {
    pub warnings: Vec<Diagnostic>,
    pub errors: Vec<Diagnostic>,
    pub targets: Vec<BuildTarget>,
    pub files_compiled: u32,
}

#[derive(Default)]
struct Inner {
    warnings: Vec<Diagnostic>,
    errors: Vec<Diagnostic>,
    targets: TargetCollector,
}

/// Observer fed by both stream readers of a build
pub struct BuildObserver {
    hint: Option<Dialect>,
    dedup: bool,
    inner: Mutex<Inner>,
}

impl BuildObserver {
    pub fn new(hint: Option<Dialect>, dedup: bool) -> Self {
        Self {
            hint,
            dedup,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Take what has been gathered so far
    pub fn take(&self) -> Collected {
        let inner = std::mem::take(&mut *self.lock());
        let files_compiled = inner.targets.files_compiled();
        let (warnings, errors) = if self.dedup {
            (classify::dedup(inner.warnings), classify::dedup(inner.errors))
        } else {
            (inner.warnings, inner.errors)
        };
        Collected {
            warnings,
            errors,
            targets: inner.targets.into_targets(),
            files_compiled,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LineObserver for BuildObserver {
    fn observe(&self, _stream: Stream, line: &str) {
        // Classify outside the lock
        let diagnostic = classify::classify(line, self.hint);

        let mut inner = self.lock();
        match diagnostic {
            Some(d) if d.kind == DiagnosticKind::Error => inner.errors.push(d),
            Some(d) => inner.warnings.push(d),
            None => inner.targets.observe(line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(observer: &BuildObserver, lines: &[(Stream, &str)]) {
        for (stream, line) in lines {
            observer.observe(*stream, line);
        }
    }

    #[test]
    fn test_collects_from_both_streams() {
        let observer = BuildObserver::new(Some(Dialect::Gnu), false);
        feed(
            &observer,
            &[
                (Stream::Stdout, "[1/3] Building CXX object CMakeFiles/app.dir/main.cpp.o"),
                (Stream::Stderr, "main.cpp:10:5: warning: unused variable 'x'"),
                (Stream::Stderr, "main.cpp:12:1: error: expected ';' before '}' token"),
                (Stream::Stdout, "[3/3] Linking CXX executable app"),
                (Stream::Stdout, "ninja: build stopped: subcommand failed."),
            ],
        );

        let collected = observer.take();
        assert_eq!(collected.warnings.len(), 1);
        assert_eq!(collected.errors.len(), 1);
        assert_eq!(collected.errors[0].line, Some(12));
        assert_eq!(collected.files_compiled, 1);
        assert_eq!(collected.targets.len(), 1);
        assert_eq!(collected.targets[0].name, "app");
    }

    #[test]
    fn test_dedup_option() {
        let lines = [
            (Stream::Stderr, "util.h:3:1: warning: unused function 'f'"),
            (Stream::Stderr, "util.h:3:1: warning: unused function 'f'"),
        ];

        let keep = BuildObserver::new(None, false);
        feed(&keep, &lines);
        assert_eq!(keep.take().warnings.len(), 2);

        let dedup = BuildObserver::new(None, true);
        feed(&dedup, &lines);
        assert_eq!(dedup.take().warnings.len(), 1);
    }

    #[test]
    fn test_empty_output() {
        let collected = BuildObserver::new(None, false).take();
        assert!(collected.warnings.is_empty());
        assert!(collected.errors.is_empty());
        assert!(collected.targets.is_empty());
        assert_eq!(collected.files_compiled, 0);
    }
}
