//! 串口设备
//!
//! 设备以 `O_NOCTTY | O_NDELAY` 打开，随后清除 `O_NONBLOCK` 回到阻塞模式，
//! 并配置为原始字节传输：
//!
//! - 忽略帧错误和校验错误（`IGNPAR`）
//! - 清空输出模式标志
//! - 8 位数据位、使能接收
//! - 非规范模式，`VMIN = 1`（至少读到一个字节才返回）
//!
//! 关闭时恢复打开前的 termios 属性。

use crate::ChassisError;
use nix::sys::termios::{
    self, BaudRate, ControlFlags, FlushArg, InputFlags, LocalFlags, OutputFlags, SetArg,
    SpecialCharacterIndices, Termios,
};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 可用作底盘链路的字节流设备
pub trait SerialDevice: Read + Write + AsRawFd + Send {
    /// 复制一个独立句柄（供读线程使用）
    fn try_clone_device(&self) -> io::Result<Box<dyn SerialDevice>>;
}

/// 串口打开器
pub trait PortOpener: Send {
    fn open(&self) -> Result<Box<dyn SerialDevice>, ChassisError>;

    /// 日志中使用的设备描述
    fn describe(&self) -> String;
}

impl SerialDevice for UnixStream {
    fn try_clone_device(&self) -> io::Result<Box<dyn SerialDevice>> {
        Ok(Box::new(self.try_clone()?))
    }
}

// ============================================================================
// TTY
// ============================================================================

/// 已配置的 TTY 设备
pub struct TtyPort {
    file: File,
    /// 打开前的属性；只有原始句柄持有，克隆句柄不恢复
    saved: Option<Termios>,
}

impl Read for TtyPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for TtyPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl AsRawFd for TtyPort {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl SerialDevice for TtyPort {
    fn try_clone_device(&self) -> io::Result<Box<dyn SerialDevice>> {
        Ok(Box::new(TtyPort {
            file: self.file.try_clone()?,
            saved: None,
        }))
    }
}

impl Drop for TtyPort {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(e) = termios::tcsetattr(&self.file, SetArg::TCSANOW, &saved) {
                warn!("Failed to restore serial attributes: {}", e);
            }
        }
    }
}

/// 按路径打开并配置 TTY
#[derive(Debug, Clone)]
pub struct TtyOpener {
    path: PathBuf,
    baud: u32,
}

impl TtyOpener {
    pub fn new(path: impl Into<PathBuf>, baud: u32) -> Self {
        Self {
            path: path.into(),
            baud,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn port_error(&self, source: io::Error) -> ChassisError {
        ChassisError::PortError {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl PortOpener for TtyOpener {
    fn open(&self) -> Result<Box<dyn SerialDevice>, ChassisError> {
        let speed = baud_rate(self.baud).ok_or(ChassisError::UnsupportedBaud(self.baud))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NDELAY)
            .open(&self.path)
            .map_err(|e| self.port_error(e))?;
        let fd = file.as_raw_fd();

        clear_nonblocking(fd).map_err(|e| self.port_error(e))?;
        let saved = configure_raw(&file, speed).map_err(|e| self.port_error(e.into()))?;

        debug!("Opened serial port {} at {} baud", self.path.display(), self.baud);
        Ok(Box::new(TtyPort {
            file,
            saved: Some(saved),
        }))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

fn baud_rate(baud: u32) -> Option<BaudRate> {
    match baud {
        1200 => Some(BaudRate::B1200),
        2400 => Some(BaudRate::B2400),
        4800 => Some(BaudRate::B4800),
        9600 => Some(BaudRate::B9600),
        19200 => Some(BaudRate::B19200),
        38400 => Some(BaudRate::B38400),
        57600 => Some(BaudRate::B57600),
        115200 => Some(BaudRate::B115200),
        _ => None,
    }
}

/// 清除 `O_NONBLOCK`，让读操作阻塞到有数据
fn clear_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: 仅对有效 fd 调用 fcntl
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// 配置原始模式，返回原属性
fn configure_raw(file: &File, speed: BaudRate) -> nix::Result<Termios> {
    let saved = termios::tcgetattr(file)?;

    let mut attr = saved.clone();
    attr.input_flags = InputFlags::IGNPAR;
    attr.output_flags = OutputFlags::empty();
    attr.control_flags = ControlFlags::CS8 | ControlFlags::CREAD;
    attr.local_flags.remove(LocalFlags::ICANON);
    attr.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    attr.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
    termios::cfsetispeed(&mut attr, speed)?;
    termios::cfsetospeed(&mut attr, speed)?;

    termios::tcflush(file, FlushArg::TCIFLUSH)?;
    termios::tcsetattr(file, SetArg::TCSANOW, &attr)?;
    Ok(saved)
}
