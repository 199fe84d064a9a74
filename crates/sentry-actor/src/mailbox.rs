//! 邮箱
//!
//! 互斥锁 + 条件变量保护的 FIFO 队列。任意线程可以 `push`，只有所属 actor 的线程
//! `pop`/`wait`。`more` 标志记录"上次 pop 后仍有未读消息"，紧凑的处理循环据此
//! 在连续 pop 之间跳过加锁等待。

use parking_lot::{Condvar, Mutex};
use sentry_protocol::Message;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// 消息邮箱
pub struct Mailbox<M = Message> {
    queue: Mutex<VecDeque<M>>,
    ready: Condvar,
    /// 队列中还有未读消息
    more: AtomicBool,
}

impl<M> Mailbox<M> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            more: AtomicBool::new(false),
        }
    }

    /// 入队并唤醒一个等待者，从不阻塞（除短暂持锁外）
    pub fn push(&self, msg: M) {
        let mut queue = self.queue.lock();
        queue.push_back(msg);
        self.more.store(true, Ordering::Release);
        drop(queue);
        self.ready.notify_one();
    }

    /// 取出最早的消息；队列为空时返回 `None`
    pub fn pop(&self) -> Option<M> {
        let mut queue = self.queue.lock();
        let msg = queue.pop_front();
        self.more.store(!queue.is_empty(), Ordering::Release);
        msg
    }

    /// 阻塞直到队列非空
    ///
    /// 若上次 `pop` 之后已知仍有消息，立即返回。条件变量的虚假唤醒由循环重检处理。
    pub fn wait(&self) {
        if self.more.load(Ordering::Acquire) {
            return;
        }
        let mut queue = self.queue.lock();
        while queue.is_empty() {
            self.ready.wait(&mut queue);
        }
    }

    /// 带超时的等待，返回队列是否非空
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.more.load(Ordering::Acquire) {
            return true;
        }
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            // 超时后仍以队列实际状态为准
            let _ = self.ready.wait_while_for(&mut queue, |q| q.is_empty(), timeout);
        }
        !queue.is_empty()
    }

    /// 阻塞接收下一条消息
    pub fn recv(&self) -> M {
        loop {
            self.wait();
            if let Some(msg) = self.pop() {
                return msg;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl<M> Default for Mailbox<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Drop for Mailbox<M> {
    fn drop(&mut self) {
        let pending = self.queue.get_mut().len();
        if pending > 0 {
            debug!("Discarding {} queued messages", pending);
        }
    }
}

impl<M> std::fmt::Debug for Mailbox<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_pop_empty() {
        let mailbox: Mailbox<u32> = Mailbox::new();
        assert_eq!(mailbox.pop(), None);
    }

    #[test]
    fn test_fifo_single_producer() {
        let mailbox = Mailbox::new();
        for i in 0..10u32 {
            mailbox.push(i);
        }
        let drained: Vec<u32> = std::iter::from_fn(|| mailbox.pop()).collect();
        assert_eq!(drained, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_wait_returns_when_more_pending() {
        let mailbox = Mailbox::new();
        mailbox.push(1u32);
        mailbox.push(2u32);
        assert_eq!(mailbox.pop(), Some(1));
        // 仍有消息，wait 不应阻塞
        mailbox.wait();
        assert_eq!(mailbox.pop(), Some(2));
        assert!(mailbox.is_empty());
    }

    #[test]
    fn test_wait_blocks_until_push() {
        let mailbox = Arc::new(Mailbox::new());
        let producer = Arc::clone(&mailbox);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            producer.push(42u32);
        });

        let start = Instant::now();
        mailbox.wait();
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(mailbox.pop(), Some(42));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_empty() {
        let mailbox: Mailbox<u32> = Mailbox::new();
        assert!(!mailbox.wait_timeout(Duration::from_millis(20)));
        mailbox.push(1);
        assert!(mailbox.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_recv() {
        let mailbox = Arc::new(Mailbox::new());
        let producer = Arc::clone(&mailbox);
        thread::spawn(move || producer.push("hello"));
        assert_eq!(mailbox.recv(), "hello");
    }

    #[test]
    fn test_drop_releases_queued_messages() {
        let tracker = Arc::new(());
        let mailbox = Mailbox::new();
        for _ in 0..5 {
            mailbox.push(Arc::clone(&tracker));
        }
        assert_eq!(Arc::strong_count(&tracker), 6);
        drop(mailbox);
        assert_eq!(Arc::strong_count(&tracker), 1);
    }
}
