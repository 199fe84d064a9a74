//! 本地遥控器管理
//!
//! 收到 `SearchRemote` 后按配置的次数搜索遥控器，每找到一个向调度器报告 `UserUp`。
//! 有遥控器连接时轮询按键事件并翻译为底盘命令，同时每秒发送一次 `Heartbeat`；
//! 遥控器断开时报告 `UserDown`。无事可做时阻塞在邮箱上。

use crate::RcmgrConfig;
use sentry_actor::{Actor, ActorContext, Mailbox};
use sentry_protocol::{Message, MoveDirection};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

/// 心跳间隔
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// 轮询无事件时的等待上限
const IDLE_POLL: Duration = Duration::from_millis(10);

// ============================================================================
// 按键
// ============================================================================

/// 遥控器按键
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Button {
    Two = 1 << 0,
    One = 1 << 1,
    Up = 1 << 2,
    Down = 1 << 3,
    Plus = 1 << 4,
    Minus = 1 << 5,
    A = 1 << 6,
}

/// 运动按键及其方向，按松开后的接管优先级排列
const MOTION_BUTTONS: [(Button, MoveDirection); 6] = [
    (Button::Two, MoveDirection::Forward),
    (Button::One, MoveDirection::Backward),
    (Button::Up, MoveDirection::TurnLeft),
    (Button::Down, MoveDirection::TurnRight),
    (Button::Plus, MoveDirection::RotateUp),
    (Button::Minus, MoveDirection::RotateDown),
];

/// 一次按键事件的快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonState {
    /// 当前按住
    pub pressed: u16,
    /// 本次刚按下
    pub just_pressed: u16,
    /// 本次刚松开
    pub released: u16,
}

impl ButtonState {
    pub fn press(mut self, button: Button) -> Self {
        self.pressed |= button as u16;
        self.just_pressed |= button as u16;
        self
    }

    pub fn hold(mut self, button: Button) -> Self {
        self.pressed |= button as u16;
        self
    }

    pub fn release(mut self, button: Button) -> Self {
        self.pressed &= !(button as u16);
        self.released |= button as u16;
        self
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.pressed & button as u16 != 0
    }

    pub fn is_just_pressed(&self, button: Button) -> bool {
        self.just_pressed & button as u16 != 0
    }

    pub fn is_released(&self, button: Button) -> bool {
        self.released & button as u16 != 0
    }
}

/// 把一次按键事件翻译为消息
pub fn translate_buttons(state: &ButtonState) -> Vec<Message> {
    let mut out = Vec::new();

    for (button, direction) in MOTION_BUTTONS {
        if state.is_just_pressed(button) {
            out.push(Message::Move(direction));
        }
    }
    if state.is_just_pressed(Button::A) {
        out.push(Message::SensorRequest);
    }

    // 松开运动键后由仍按住的键接管，否则停车
    if MOTION_BUTTONS.iter().any(|(b, _)| state.is_released(*b)) {
        let held = MOTION_BUTTONS
            .iter()
            .find(|(b, _)| state.is_pressed(*b))
            .map(|(_, d)| *d)
            .unwrap_or(MoveDirection::Stop);
        out.push(Message::Move(held));
    }
    out
}

// ============================================================================
// 后端
// ============================================================================

/// 遥控器事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerEvent {
    Buttons(ButtonState),
    Disconnected,
}

/// 遥控器后端
pub trait ControllerBackend: Send {
    /// 搜索并连接遥控器，最多阻塞 `timeout`，返回新连接的数量
    fn find(&mut self, timeout: Duration) -> usize;
    /// 当前已连接数量
    fn connected(&self) -> usize;
    /// 取出待处理事件，可短暂阻塞
    fn poll(&mut self) -> Vec<ControllerEvent>;
}

/// 无蓝牙协议栈时的后端：什么也找不到
#[derive(Debug, Default)]
pub struct NullBackend;

impl ControllerBackend for NullBackend {
    fn find(&mut self, _timeout: Duration) -> usize {
        0
    }

    fn connected(&self) -> usize {
        0
    }

    fn poll(&mut self) -> Vec<ControllerEvent> {
        Vec::new()
    }
}

// ============================================================================
// actor
// ============================================================================

/// 遥控器管理 actor
pub struct RemoteControlManager {
    config: RcmgrConfig,
    backend: Box<dyn ControllerBackend>,
    sink: Arc<Mailbox>,
    search: u32,
    last_heartbeat: Option<Instant>,
}

impl RemoteControlManager {
    pub fn new(config: RcmgrConfig, backend: Box<dyn ControllerBackend>, sink: Arc<Mailbox>) -> Self {
        Self {
            config,
            backend,
            sink,
            search: 0,
            last_heartbeat: None,
        }
    }

    fn send(&self, msg: Message) {
        trace!("Sending {} to dispatcher", msg);
        self.sink.push(msg);
    }

    fn search_once(&mut self) {
        self.search -= 1;
        info!("Searching for remote controllers");

        let found = self.backend.find(self.config.search_timeout());
        if found > 0 {
            info!("Connected {} remote controller(s)", found);
            for _ in 0..found {
                self.send(Message::UserUp);
            }
            self.search = 0;
        } else if self.search == 0 {
            info!("No remote controller found, giving up");
        } else {
            debug!("No remote controller found, {} tries left", self.search);
        }
    }

    /// 处理事件，返回是否有事件
    fn handle_events(&mut self) -> bool {
        let events = self.backend.poll();
        for event in &events {
            match event {
                ControllerEvent::Buttons(state) => {
                    for msg in translate_buttons(state) {
                        self.send(msg);
                    }
                },
                ControllerEvent::Disconnected => {
                    info!("Remote controller disconnected");
                    self.send(Message::UserDown);
                },
            }
        }
        !events.is_empty()
    }

    fn heartbeat(&mut self) {
        let due = self
            .last_heartbeat
            .is_none_or(|last| last.elapsed() >= HEARTBEAT_INTERVAL);
        if due {
            self.last_heartbeat = Some(Instant::now());
            self.send(Message::Heartbeat);
        }
    }
}

impl Actor for RemoteControlManager {
    fn run(&mut self, ctx: &ActorContext) {
        let Some(mailbox) = ctx.mailbox().cloned() else {
            error!("{} started without a mailbox", ctx.name());
            return;
        };
        info!("Starting {} loop", ctx.name());

        loop {
            let idle = self.search == 0 && self.backend.connected() == 0;
            if idle {
                mailbox.wait();
            }

            if let Some(msg) = mailbox.pop() {
                debug!("rcmgr received {}", msg);
                match msg {
                    Message::SearchRemote => self.search = self.config.retries,
                    Message::Terminate => break,
                    _ => {},
                }
            }

            if self.backend.connected() == 0 {
                self.last_heartbeat = None;
                if self.search > 0 {
                    self.search_once();
                }
            } else {
                let busy = self.handle_events();
                self.heartbeat();
                if !busy {
                    mailbox.wait_timeout(IDLE_POLL);
                }
            }
        }
        info!("{} terminating", ctx.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moves(msgs: &[Message]) -> Vec<MoveDirection> {
        msgs.iter()
            .filter_map(|m| match m {
                Message::Move(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_press_maps_to_direction() {
        let cases = [
            (Button::Two, MoveDirection::Forward),
            (Button::One, MoveDirection::Backward),
            (Button::Up, MoveDirection::TurnLeft),
            (Button::Down, MoveDirection::TurnRight),
            (Button::Plus, MoveDirection::RotateUp),
            (Button::Minus, MoveDirection::RotateDown),
        ];
        for (button, direction) in cases {
            let msgs = translate_buttons(&ButtonState::default().press(button));
            assert_eq!(moves(&msgs), vec![direction]);
        }
    }

    #[test]
    fn test_a_requests_sensor() {
        let msgs = translate_buttons(&ButtonState::default().press(Button::A));
        assert!(matches!(msgs.as_slice(), [Message::SensorRequest]));

        // 按住不重复触发
        let msgs = translate_buttons(&ButtonState::default().hold(Button::A));
        assert!(msgs.is_empty());
    }

    #[test]
    fn test_release_stops_when_nothing_held() {
        let state = ButtonState::default().release(Button::Two);
        assert_eq!(moves(&translate_buttons(&state)), vec![MoveDirection::Stop]);
    }

    #[test]
    fn test_release_resumes_held_direction() {
        let state = ButtonState::default()
            .hold(Button::Down)
            .hold(Button::One)
            .release(Button::Two);
        assert_eq!(
            moves(&translate_buttons(&state)),
            vec![MoveDirection::Backward]
        );
    }

    #[test]
    fn test_releasing_a_does_not_stop() {
        let state = ButtonState::default().release(Button::A);
        assert!(translate_buttons(&state).is_empty());
    }
}
