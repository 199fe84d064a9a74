//! 遥控器管理 actor 测试（脚本化后端）

use parking_lot::Mutex;
use sentry_actor::{Mailbox, Worker};
use sentry_engine::{
    Button, ButtonState, ControllerBackend, ControllerEvent, RcmgrConfig, RemoteControlManager,
};
use sentry_protocol::{Message, MoveDirection};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Script {
    /// 每次 find 的结果，耗尽后返回 0
    finds: VecDeque<usize>,
    find_calls: usize,
    connected: usize,
    events: VecDeque<ControllerEvent>,
}

#[derive(Clone, Default)]
struct ScriptedBackend(Arc<Mutex<Script>>);

impl ControllerBackend for ScriptedBackend {
    fn find(&mut self, _timeout: Duration) -> usize {
        let mut script = self.0.lock();
        script.find_calls += 1;
        let found = script.finds.pop_front().unwrap_or(0);
        script.connected += found;
        found
    }

    fn connected(&self) -> usize {
        self.0.lock().connected
    }

    fn poll(&mut self) -> Vec<ControllerEvent> {
        let mut script = self.0.lock();
        let events: Vec<_> = script.events.drain(..).collect();
        for event in &events {
            if *event == ControllerEvent::Disconnected {
                script.connected -= 1;
            }
        }
        events
    }
}

fn config() -> RcmgrConfig {
    RcmgrConfig {
        retries: 3,
        bt_timeout: 0,
    }
}

fn start(backend: ScriptedBackend) -> (Worker, Arc<Mailbox>) {
    let sink = Arc::new(Mailbox::new());
    let manager = RemoteControlManager::new(config(), Box::new(backend), Arc::clone(&sink));
    let mut worker = Worker::with_mailbox("rcmgr", manager);
    worker.start().unwrap();
    (worker, sink)
}

fn next(sink: &Mailbox) -> Option<Message> {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if let Some(msg) = sink.pop() {
            return Some(msg);
        }
        sink.wait_timeout(Duration::from_millis(50));
    }
    None
}

/// 跳过心跳
fn next_non_heartbeat(sink: &Mailbox) -> Option<Message> {
    loop {
        match next(sink)? {
            Message::Heartbeat => continue,
            other => return Some(other),
        }
    }
}

#[test]
fn test_search_gives_up_after_retries() {
    let backend = ScriptedBackend::default();
    let (mut worker, sink) = start(backend.clone());

    worker.send(Message::SearchRemote);
    let deadline = Instant::now() + Duration::from_secs(3);
    while backend.0.lock().find_calls < 3 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(backend.0.lock().find_calls, 3);
    assert!(sink.is_empty());
    worker.stop();
}

#[test]
fn test_found_controller_reports_user_and_heartbeat() {
    let backend = ScriptedBackend::default();
    backend.0.lock().finds.extend([0, 1]);
    let (mut worker, sink) = start(backend.clone());

    worker.send(Message::SearchRemote);
    assert!(matches!(next(&sink), Some(Message::UserUp)));
    assert!(matches!(next(&sink), Some(Message::Heartbeat)));
    // 找到后不再继续搜索
    assert_eq!(backend.0.lock().find_calls, 2);
    worker.stop();
}

#[test]
fn test_button_events_and_disconnect() {
    let backend = ScriptedBackend::default();
    backend.0.lock().finds.push_back(1);
    let (mut worker, sink) = start(backend.clone());

    worker.send(Message::SearchRemote);
    assert!(matches!(next_non_heartbeat(&sink), Some(Message::UserUp)));

    {
        let mut script = backend.0.lock();
        script
            .events
            .push_back(ControllerEvent::Buttons(ButtonState::default().press(Button::Two)));
        script
            .events
            .push_back(ControllerEvent::Buttons(ButtonState::default().release(Button::Two)));
        script.events.push_back(ControllerEvent::Disconnected);
    }

    assert!(matches!(
        next_non_heartbeat(&sink),
        Some(Message::Move(MoveDirection::Forward))
    ));
    assert!(matches!(
        next_non_heartbeat(&sink),
        Some(Message::Move(MoveDirection::Stop))
    ));
    assert!(matches!(next_non_heartbeat(&sink), Some(Message::UserDown)));
    worker.stop();
}
