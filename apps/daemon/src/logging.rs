//! 日志输出
//!
//! 默认写 stderr；`-l <file>` 写文件（非阻塞，不轮转）；`-s` 写本地 syslog。

use std::ffi::CString;
use std::io;
use std::path::Path;
use tracing::{Level, Metadata};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// 日志目的地
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Stderr,
    File(std::path::PathBuf),
    Syslog,
}

/// `-v` 次数对应的默认级别
pub fn default_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// 安装全局订阅者；返回的 guard 必须在进程退出前保持存活
pub fn init(verbose: u8, sink: &LogSink) -> io::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbose)));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match sink {
        LogSink::Stderr => {
            builder.with_writer(io::stderr).init();
            Ok(None)
        },
        LogSink::File(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let name = path
                .file_name()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "log path has no file name"))?;
            let appender = tracing_appender::rolling::never(dir.unwrap_or(Path::new(".")), name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            builder.with_writer(writer).with_ansi(false).init();
            Ok(Some(guard))
        },
        LogSink::Syslog => {
            builder
                .with_writer(Syslog::open())
                .with_ansi(false)
                .without_time()
                .init();
            Ok(None)
        },
    }
}

// ============================================================================
// syslog
// ============================================================================

/// 本地 syslog 写入器工厂
pub struct Syslog(());

impl Syslog {
    pub fn open() -> Self {
        // SAFETY: ident 为静态字符串，整个进程期间有效
        unsafe {
            libc::openlog(c"sentry".as_ptr(), libc::LOG_PID, libc::LOG_DAEMON);
        }
        Syslog(())
    }
}

impl<'a> MakeWriter<'a> for Syslog {
    type Writer = SyslogLine;

    fn make_writer(&'a self) -> Self::Writer {
        SyslogLine::new(libc::LOG_INFO)
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        let priority = match *meta.level() {
            Level::ERROR => libc::LOG_ERR,
            Level::WARN => libc::LOG_WARNING,
            Level::INFO => libc::LOG_INFO,
            Level::DEBUG | Level::TRACE => libc::LOG_DEBUG,
        };
        SyslogLine::new(priority)
    }
}

/// 一条日志，析构时整体提交
pub struct SyslogLine {
    priority: libc::c_int,
    buf: Vec<u8>,
}

impl SyslogLine {
    fn new(priority: libc::c_int) -> Self {
        Self {
            priority,
            buf: Vec::new(),
        }
    }
}

impl io::Write for SyslogLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SyslogLine {
    fn drop(&mut self) {
        while self.buf.last() == Some(&b'\n') {
            self.buf.pop();
        }
        if self.buf.is_empty() {
            return;
        }
        // 内部 NUL 会截断消息
        self.buf.retain(|&b| b != 0);
        let Ok(line) = CString::new(std::mem::take(&mut self.buf)) else {
            return;
        };
        // SAFETY: 格式串与参数均为有效的 NUL 结尾字符串
        unsafe {
            libc::syslog(self.priority, c"%s".as_ptr(), line.as_ptr());
        }
    }
}
