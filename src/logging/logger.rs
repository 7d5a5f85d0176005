use dashmap::DashMap;
use std::panic::Location;
use std::sync::{Arc, RwLock};

use super::level::{LogLevel, LoggerLevels};
use super::record::{LogContext, LogRecord};
use super::sink::Sink;

struct RegistryInner {
    sinks: RwLock<Vec<Arc<dyn Sink>>>,
    levels: RwLock<LoggerLevels>,
    /// Pre-computed effective levels; invalidated whenever levels change, so
    /// emission is a single map lookup.
    resolved: DashMap<String, LogLevel>,
}

/// Process-wide family of dotted-name loggers sharing one sink list and one
/// level configuration. Constructed explicitly at the composition root and
/// passed through; there is no global instance.
#[derive(Clone)]
pub struct LoggerRegistry {
    inner: Arc<RegistryInner>,
}

impl LoggerRegistry {
    pub fn new(levels: LoggerLevels) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sinks: RwLock::new(Vec::new()),
                levels: RwLock::new(levels),
                resolved: DashMap::new(),
            }),
        }
    }

    /// Look up (lazily creating) a logger handle by dotted name. The empty
    /// name is the root.
    pub fn logger(&self, name: &str) -> Logger {
        Logger {
            name: Arc::from(name),
            inner: self.inner.clone(),
        }
    }

    pub fn add_sink(&self, sink: Arc<dyn Sink>) {
        self.inner.sinks.write().expect("sink list poisoned").push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.inner.sinks.read().expect("sink list poisoned").len()
    }

    /// Override the minimum level for one dotted name and invalidate the
    /// resolution cache.
    pub fn set_level(&self, name: &str, level: LogLevel) {
        self.inner
            .levels
            .write()
            .expect("logger levels poisoned")
            .set(name, level);
        self.inner.resolved.clear();
    }

    pub fn effective_level(&self, name: &str) -> LogLevel {
        if let Some(level) = self.inner.resolved.get(name) {
            return *level;
        }
        let level = self
            .inner
            .levels
            .read()
            .expect("logger levels poisoned")
            .resolve(name);
        self.inner.resolved.insert(name.to_string(), level);
        level
    }

    /// Close every sink, flushing buffered output. Sink close errors are
    /// reported to stderr.
    pub fn close(&self) {
        for sink in self.inner.sinks.read().expect("sink list poisoned").iter() {
            if let Err(err) = sink.close() {
                eprintln!("Logging error: sink close failed: {}", err);
            }
        }
    }
}

/// Cheap cloneable handle bound to one dotted name.
#[derive(Clone)]
pub struct Logger {
    name: Arc<str>,
    inner: Arc<RegistryInner>,
}

impl Logger {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        if let Some(resolved) = self.inner.resolved.get(self.name.as_ref()) {
            return level >= *resolved;
        }
        let resolved = self
            .inner
            .levels
            .read()
            .expect("logger levels poisoned")
            .resolve(&self.name);
        self.inner.resolved.insert(self.name.to_string(), resolved);
        level >= resolved
    }

    #[track_caller]
    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Debug, None, message.as_ref());
    }

    #[track_caller]
    pub fn debug_ctx(&self, ctx: &LogContext, message: impl AsRef<str>) {
        self.log(LogLevel::Debug, Some(ctx), message.as_ref());
    }

    #[track_caller]
    pub fn info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, None, message.as_ref());
    }

    #[track_caller]
    pub fn info_ctx(&self, ctx: &LogContext, message: impl AsRef<str>) {
        self.log(LogLevel::Info, Some(ctx), message.as_ref());
    }

    #[track_caller]
    pub fn warning(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Warning, None, message.as_ref());
    }

    #[track_caller]
    pub fn warning_ctx(&self, ctx: &LogContext, message: impl AsRef<str>) {
        self.log(LogLevel::Warning, Some(ctx), message.as_ref());
    }

    #[track_caller]
    pub fn error(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Error, None, message.as_ref());
    }

    #[track_caller]
    pub fn error_ctx(&self, ctx: &LogContext, message: impl AsRef<str>) {
        self.log(LogLevel::Error, Some(ctx), message.as_ref());
    }

    #[track_caller]
    pub fn critical(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Critical, None, message.as_ref());
    }

    #[track_caller]
    pub fn critical_ctx(&self, ctx: &LogContext, message: impl AsRef<str>) {
        self.log(LogLevel::Critical, Some(ctx), message.as_ref());
    }

    #[track_caller]
    fn log(&self, level: LogLevel, ctx: Option<&LogContext>, message: &str) {
        if !self.enabled(level) {
            return;
        }

        let location = Location::caller();
        let record = LogRecord::new(
            level,
            &self.name,
            message.to_string(),
            location.file(),
            location.line(),
            ctx,
        );

        for sink in self.inner.sinks.read().expect("sink list poisoned").iter() {
            if let Err(err) = sink.emit(&record) {
                // Last resort; a broken sink must not silence the others.
                eprintln!("Logging error: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::sink::test_support::SharedBuf;
    use crate::logging::sink::StreamSink;

    fn registry_with_buffer(levels: LoggerLevels) -> (LoggerRegistry, SharedBuf) {
        let registry = LoggerRegistry::new(levels);
        let buf = SharedBuf::default();
        registry.add_sink(Arc::new(StreamSink::plain(buf.clone())));
        (registry, buf)
    }

    #[test]
    fn test_emission_respects_hierarchy() {
        let mut levels = LoggerLevels::new();
        levels.set("myapp.sql", LogLevel::Debug);
        levels.set("myapp", LogLevel::Warning);
        levels.set("", LogLevel::Info);
        let (registry, buf) = registry_with_buffer(levels);

        registry.logger("myapp.sql.driver").debug("shown sql debug");
        registry.logger("myapp.http").debug("suppressed http debug");
        registry.logger("myapp.http").info("suppressed http info");
        registry.logger("myapp.http").warning("shown http warning");
        registry.logger("other").info("shown other info");

        let output = buf.contents();
        assert!(output.contains("shown sql debug"));
        assert!(!output.contains("suppressed http debug"));
        assert!(!output.contains("suppressed http info"));
        assert!(output.contains("shown http warning"));
        assert!(output.contains("shown other info"));
    }

    #[test]
    fn test_set_level_invalidates_cache() {
        let (registry, buf) = registry_with_buffer(LoggerLevels::new());
        let logger = registry.logger("goodoo.pool");

        logger.debug("before override");
        assert!(!buf.contents().contains("before override"));

        registry.set_level("goodoo", LogLevel::Debug);
        logger.debug("after override");
        assert!(buf.contents().contains("after override"));
    }

    #[test]
    fn test_single_thread_emission_order() {
        let (registry, buf) = registry_with_buffer(LoggerLevels::new());
        let logger = registry.logger("goodoo.order");

        for i in 0..5 {
            logger.info(format!("message-{}", i));
        }

        let output = buf.contents();
        let positions: Vec<usize> = (0..5)
            .map(|i| output.find(&format!("message-{}", i)).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_failing_sink_does_not_block_others() {
        struct FailingSink;
        impl Sink for FailingSink {
            fn emit(&self, _record: &LogRecord) -> anyhow::Result<()> {
                anyhow::bail!("disk on fire")
            }
        }

        let registry = LoggerRegistry::new(LoggerLevels::new());
        registry.add_sink(Arc::new(FailingSink));
        let buf = SharedBuf::default();
        registry.add_sink(Arc::new(StreamSink::plain(buf.clone())));

        registry.logger("goodoo").info("still delivered");
        assert!(buf.contents().contains("still delivered"));
    }

    #[test]
    fn test_ctx_variant_carries_db_tag() {
        let (registry, buf) = registry_with_buffer(LoggerLevels::new());
        let ctx = LogContext::with_db("tenant9");

        registry.logger("goodoo.api").info_ctx(&ctx, "tagged line");

        assert!(buf.contents().contains(" tenant9 goodoo.api: tagged line"));
    }
}
