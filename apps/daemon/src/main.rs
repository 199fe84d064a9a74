//! sentry 守护进程主入口
//!
//! 读取配置、安装日志与信号处理，然后在主线程运行引擎直到收到终止信号。

mod logging;

use clap::Parser;
use logging::LogSink;
use sentry_engine::{Engine, EngineError, SentryConfig};
use sentry_protocol::Message;
use std::path::PathBuf;
use std::process;
use thiserror::Error;
use tracing::{error, info};

/// 遥操作机器人服务端
#[derive(Parser, Debug)]
#[command(name = "sentryd")]
#[command(about = "Teleoperated robot server", long_about = None)]
#[command(version)]
struct Args {
    /// 提高日志详细程度（-v debug，-vv trace）
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// 配置文件路径
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// 日志写入文件
    #[arg(short, long, value_name = "FILE", conflicts_with = "syslog")]
    log: Option<PathBuf>,

    /// 日志写入 syslog
    #[arg(short, long)]
    syslog: bool,
}

impl Args {
    fn log_sink(&self) -> LogSink {
        match (&self.log, self.syslog) {
            (Some(path), _) => LogSink::File(path.clone()),
            (None, true) => LogSink::Syslog,
            (None, false) => LogSink::Stderr,
        }
    }
}

#[derive(Error, Debug)]
enum DaemonError {
    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("Failed to set signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

fn run(args: &Args) -> Result<(), DaemonError> {
    let path = SentryConfig::resolve_path(args.config.clone());
    let config = SentryConfig::from_file(&path)?;
    info!("Configuration loaded from {}", path.display());

    let engine = Engine::new(config);

    // SIGINT/SIGTERM/SIGHUP → Terminate
    let mailbox = engine.mailbox();
    ctrlc::set_handler(move || {
        info!("Termination signal received");
        mailbox.push(Message::Terminate);
    })?;

    engine.run()?;
    Ok(())
}

fn main() {
    let args = Args::parse();

    let guard = match logging::init(args.verbose, &args.log_sink()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to open log destination: {}", e);
            process::exit(1);
        },
    };

    info!("sentryd {} starting", env!("CARGO_PKG_VERSION"));
    if let Err(e) = run(&args) {
        error!("{}", e);
        // guard 在 exit 前不会析构，先手动释放以刷新文件日志
        drop(guard);
        process::exit(1);
    }
    info!("sentryd exiting");
    drop(guard);
}
