//! 通道 LED 状态机
//!
//! 每个通道一个有限状态机（`NORMAL_STOPPED` / `NORMAL_STARTED` /
//! `IDENTIFY`），由 50ms 节拍与通道事件驱动。活动事件在入队前做
//! 低通滤波：活动窗口尚未结束时到达的事件直接丢弃。
//!
//! GPIO 后端通过 `LedDriver` 抽象；没有独立活动 LED 的板型由 RX/TX
//! 共享一颗，只有状态 LED 的板型在活动窗口内反转状态 LED。

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, tick, unbounded, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::ops::GsUsbEvent;

/// 节拍周期
pub const LED_TICK_MS: u64 = 50;
/// 活动窗口长度（节拍数）
pub const LED_TICKS_ACTIVITY: u32 = 2;
/// 识别闪烁半周期（节拍数，整周期 20 拍 ≈ 1 Hz）
pub const LED_TICKS_IDENTIFY: u32 = 10;

const ACTIVITY_RX: usize = 0;
const ACTIVITY_TX: usize = 1;

/// 通道 LED
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Led {
    State,
    ActivityRx,
    ActivityTx,
}

/// LED GPIO 后端
pub trait LedDriver: Send {
    /// 对应 LED 是否存在
    fn has_led(&self, led: Led) -> bool;
    fn set_led(&mut self, led: Led, on: bool);
    fn toggle_led(&mut self, led: Led);
}

/// 状态机状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LedState {
    NormalStopped,
    NormalStarted,
    Identify,
}

/// 状态机事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LedEvent {
    Tick,
    ChannelStarted,
    ChannelStopped,
    ActivityRx,
    ActivityTx,
    IdentifyOn,
    IdentifyOff,
}

/// 单通道状态机上下文
struct LedCtx {
    driver: Box<dyn LedDriver>,
    ch: u16,
    state: LedState,
    started: bool,
    ticks: [u32; 2],
    identify_ticks: u32,
}

impl LedCtx {
    fn new(ch: u16, driver: Box<dyn LedDriver>) -> Self {
        let mut ctx = Self {
            driver,
            ch,
            state: LedState::NormalStopped,
            started: false,
            ticks: [0; 2],
            identify_ticks: 0,
        };
        ctx.enter(LedState::NormalStopped);
        ctx
    }

    fn indicate_state(&mut self, on: bool) {
        if self.driver.has_led(Led::State) {
            self.driver.set_led(Led::State, on);
        }
    }

    fn indicate_activity(&mut self, dir: usize, on: bool) {
        let led = match dir {
            ACTIVITY_RX if self.driver.has_led(Led::ActivityRx) => Some(Led::ActivityRx),
            ACTIVITY_TX if self.driver.has_led(Led::ActivityTx) => Some(Led::ActivityTx),
            ACTIVITY_TX if self.driver.has_led(Led::ActivityRx) => Some(Led::ActivityRx),
            _ => None,
        };

        match led {
            Some(led) => self.driver.set_led(led, on),
            None => {
                if self.started && self.driver.has_led(Led::State) {
                    self.driver.set_led(Led::State, !on);
                }
            }
        }
    }

    fn enter(&mut self, state: LedState) {
        match state {
            LedState::NormalStopped if self.started => {
                self.enter(LedState::NormalStarted);
                return;
            }
            LedState::NormalStopped => {
                self.state = state;
                self.indicate_state(false);
                self.indicate_activity(ACTIVITY_RX, false);
                self.indicate_activity(ACTIVITY_TX, false);
            }
            LedState::NormalStarted => {
                self.state = state;
                self.ticks = [0; 2];
                self.indicate_state(true);
                self.indicate_activity(ACTIVITY_RX, false);
                self.indicate_activity(ACTIVITY_TX, false);
            }
            LedState::Identify => {
                self.state = state;
                self.identify_ticks = LED_TICKS_IDENTIFY;
                self.indicate_state(true);
                self.indicate_activity(ACTIVITY_RX, true);
                self.indicate_activity(ACTIVITY_TX, true);
            }
        }
    }

    fn handle(&mut self, event: LedEvent) {
        if event == LedEvent::IdentifyOn && self.state != LedState::Identify {
            debug!("identify channel {} on", self.ch);
            self.enter(LedState::Identify);
            return;
        }

        match self.state {
            LedState::NormalStopped => match event {
                LedEvent::ChannelStarted => {
                    debug!("channel {} started", self.ch);
                    self.started = true;
                    self.enter(LedState::NormalStarted);
                }
                _ => {
                    // 事件忽略
                }
            },
            LedState::NormalStarted => match event {
                LedEvent::Tick => {
                    for dir in [ACTIVITY_RX, ACTIVITY_TX] {
                        if self.ticks[dir] != 0 {
                            self.ticks[dir] -= 1;
                            if self.ticks[dir] == LED_TICKS_ACTIVITY / 2 {
                                self.indicate_activity(dir, true);
                            } else if self.ticks[dir] == 0 {
                                self.indicate_activity(dir, false);
                            }
                        }
                    }
                }
                LedEvent::ChannelStopped => {
                    debug!("channel {} stopped", self.ch);
                    self.started = false;
                    self.enter(LedState::NormalStopped);
                }
                LedEvent::ActivityRx => {
                    self.ticks[ACTIVITY_RX] = LED_TICKS_ACTIVITY;
                }
                LedEvent::ActivityTx => {
                    self.ticks[ACTIVITY_TX] = LED_TICKS_ACTIVITY;
                }
                _ => {
                    // 事件忽略
                }
            },
            LedState::Identify => match event {
                LedEvent::Tick => {
                    self.identify_ticks -= 1;
                    if self.identify_ticks == 0 {
                        for led in [Led::State, Led::ActivityRx, Led::ActivityTx] {
                            if self.driver.has_led(led) {
                                self.driver.toggle_led(led);
                            }
                        }
                        self.identify_ticks = LED_TICKS_IDENTIFY;
                    }
                }
                LedEvent::ChannelStarted => {
                    self.started = true;
                }
                LedEvent::ChannelStopped => {
                    self.started = false;
                }
                LedEvent::IdentifyOff => {
                    debug!("identify channel {} off", self.ch);
                    self.enter(LedState::NormalStopped);
                }
                _ => {
                    // 事件忽略
                }
            },
        }
    }
}

/// 入队侧的活动事件低通滤波窗口
struct ActivityWindow {
    deadline: Mutex<[Option<Instant>; 2]>,
    /// 是否有独立的 TX 活动 LED（没有时 RX/TX 共用一个窗口）
    has_dual: bool,
}

impl ActivityWindow {
    /// 活动窗口已过则重新武装并放行；未过则丢弃
    fn pass(&self, idx: usize, window: Duration) -> bool {
        let mut deadline = self.deadline.lock();
        let now = Instant::now();

        if let Some(d) = deadline[idx] {
            if now < d {
                return false;
            }
        }

        deadline[idx] = Some(now + window);
        true
    }
}

/// 通道 LED 指示器
///
/// 把 `GsUsbEvent` 翻译为状态机事件并在单独的 LED 线程上运行全部
/// 通道的状态机。`notify` 可直接接到 `GsUsbOps::event` 上。
#[derive(Clone)]
pub struct LedIndicator {
    events: Sender<(u16, LedEvent)>,
    windows: Arc<Vec<ActivityWindow>>,
}

impl LedIndicator {
    /// 每通道一个 LED 驱动；启动 LED 线程与 50ms 节拍
    pub fn new(drivers: Vec<Box<dyn LedDriver>>) -> Self {
        let (events, events_rx) = unbounded();

        let windows = Arc::new(
            drivers
                .iter()
                .map(|driver| ActivityWindow {
                    deadline: Mutex::new([None; 2]),
                    has_dual: driver.has_led(Led::ActivityTx),
                })
                .collect::<Vec<_>>(),
        );

        let mut ctxs: Vec<LedCtx> = drivers
            .into_iter()
            .enumerate()
            .map(|(ch, driver)| LedCtx::new(ch as u16, driver))
            .collect();

        thread::Builder::new()
            .name("led".into())
            .spawn(move || {
                let ticker = tick(Duration::from_millis(LED_TICK_MS));

                loop {
                    select! {
                        recv(ticker) -> _ => {
                            for ctx in ctxs.iter_mut() {
                                ctx.handle(LedEvent::Tick);
                            }
                        }
                        recv(events_rx) -> msg => match msg {
                            Ok((ch, event)) => {
                                if let Some(ctx) = ctxs.get_mut(ch as usize) {
                                    ctx.handle(event);
                                }
                            }
                            Err(_) => break,
                        }
                    }
                }
            })
            .expect("failed to spawn led thread");

        Self { events, windows }
    }

    /// 通道事件入口（可直接用作 `GsUsbOps::event` 回调）
    pub fn notify(&self, ch: u16, event: GsUsbEvent) {
        let Some(window) = self.windows.get(ch as usize) else {
            error!("event for non-existing channel {}", ch);
            return;
        };

        let led_event = match event {
            GsUsbEvent::ChannelStarted => LedEvent::ChannelStarted,
            GsUsbEvent::ChannelStopped => LedEvent::ChannelStopped,
            GsUsbEvent::ChannelActivityRx | GsUsbEvent::ChannelActivityTx => {
                let is_tx = event == GsUsbEvent::ChannelActivityTx;
                let idx = if is_tx && window.has_dual {
                    ACTIVITY_TX
                } else {
                    ACTIVITY_RX
                };

                if !window.pass(
                    idx,
                    Duration::from_millis(LED_TICK_MS * LED_TICKS_ACTIVITY as u64),
                ) {
                    return;
                }

                if is_tx {
                    LedEvent::ActivityTx
                } else {
                    LedEvent::ActivityRx
                }
            }
            GsUsbEvent::ChannelIdentifyOn => LedEvent::IdentifyOn,
            GsUsbEvent::ChannelIdentifyOff => LedEvent::IdentifyOff,
        };

        if self.events.send((ch, led_event)).is_err() {
            warn!("failed to enqueue LED event for channel {}", ch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// 记录型 LED 驱动
    struct MockDriver {
        present: Vec<Led>,
        states: Arc<Mutex<HashMap<&'static str, bool>>>,
    }

    fn key(led: Led) -> &'static str {
        match led {
            Led::State => "state",
            Led::ActivityRx => "rx",
            Led::ActivityTx => "tx",
        }
    }

    impl MockDriver {
        fn new(present: Vec<Led>) -> (Self, Arc<Mutex<HashMap<&'static str, bool>>>) {
            let states = Arc::new(Mutex::new(HashMap::new()));
            (
                Self {
                    present,
                    states: states.clone(),
                },
                states,
            )
        }
    }

    impl LedDriver for MockDriver {
        fn has_led(&self, led: Led) -> bool {
            self.present.contains(&led)
        }

        fn set_led(&mut self, led: Led, on: bool) {
            self.states.lock().insert(key(led), on);
        }

        fn toggle_led(&mut self, led: Led) {
            let mut states = self.states.lock();
            let entry = states.entry(key(led)).or_insert(false);
            *entry = !*entry;
        }
    }

    fn full_ctx() -> (LedCtx, Arc<Mutex<HashMap<&'static str, bool>>>) {
        let (driver, states) =
            MockDriver::new(vec![Led::State, Led::ActivityRx, Led::ActivityTx]);
        (LedCtx::new(0, Box::new(driver)), states)
    }

    #[test]
    fn test_initial_state_all_off() {
        let (_ctx, states) = full_ctx();
        let states = states.lock();
        assert_eq!(states.get("state"), Some(&false));
        assert_eq!(states.get("rx"), Some(&false));
        assert_eq!(states.get("tx"), Some(&false));
    }

    #[test]
    fn test_started_turns_state_led_on() {
        let (mut ctx, states) = full_ctx();

        ctx.handle(LedEvent::ChannelStarted);
        assert_eq!(ctx.state, LedState::NormalStarted);
        assert_eq!(states.lock().get("state"), Some(&true));

        ctx.handle(LedEvent::ChannelStopped);
        assert_eq!(ctx.state, LedState::NormalStopped);
        assert_eq!(states.lock().get("state"), Some(&false));
    }

    #[test]
    fn test_activity_countdown() {
        let (mut ctx, states) = full_ctx();
        ctx.handle(LedEvent::ChannelStarted);

        ctx.handle(LedEvent::ActivityRx);
        assert_eq!(ctx.ticks[ACTIVITY_RX], LED_TICKS_ACTIVITY);

        // 倒数至中点点亮，归零熄灭
        ctx.handle(LedEvent::Tick);
        assert_eq!(states.lock().get("rx"), Some(&true));

        ctx.handle(LedEvent::Tick);
        assert_eq!(states.lock().get("rx"), Some(&false));
    }

    #[test]
    fn test_activity_ignored_while_stopped() {
        let (mut ctx, states) = full_ctx();

        ctx.handle(LedEvent::ActivityRx);
        ctx.handle(LedEvent::Tick);
        assert_eq!(states.lock().get("rx"), Some(&false));
        assert_eq!(ctx.ticks[ACTIVITY_RX], 0);
    }

    #[test]
    fn test_tx_shares_rx_led_without_dual() {
        let (driver, states) = MockDriver::new(vec![Led::State, Led::ActivityRx]);
        let mut ctx = LedCtx::new(0, Box::new(driver));
        ctx.handle(LedEvent::ChannelStarted);

        ctx.handle(LedEvent::ActivityTx);
        ctx.handle(LedEvent::Tick);
        // TX 活动点亮共享的 RX LED
        assert_eq!(states.lock().get("rx"), Some(&true));
    }

    #[test]
    fn test_state_led_inverted_without_activity_leds() {
        let (driver, states) = MockDriver::new(vec![Led::State]);
        let mut ctx = LedCtx::new(0, Box::new(driver));
        ctx.handle(LedEvent::ChannelStarted);
        assert_eq!(states.lock().get("state"), Some(&true));

        ctx.handle(LedEvent::ActivityRx);
        ctx.handle(LedEvent::Tick);
        // 活动窗口内状态 LED 反转
        assert_eq!(states.lock().get("state"), Some(&false));

        ctx.handle(LedEvent::Tick);
        assert_eq!(states.lock().get("state"), Some(&true));
    }

    #[test]
    fn test_identify_from_any_state() {
        let (mut ctx, states) = full_ctx();

        ctx.handle(LedEvent::IdentifyOn);
        assert_eq!(ctx.state, LedState::Identify);
        {
            let states = states.lock();
            assert_eq!(states.get("state"), Some(&true));
            assert_eq!(states.get("rx"), Some(&true));
            assert_eq!(states.get("tx"), Some(&true));
        }

        // 识别模式下 started 标志仍被跟踪
        ctx.handle(LedEvent::ChannelStarted);
        ctx.handle(LedEvent::IdentifyOff);
        assert_eq!(ctx.state, LedState::NormalStarted);
    }

    #[test]
    fn test_identify_off_returns_to_stopped() {
        let (mut ctx, _states) = full_ctx();

        ctx.handle(LedEvent::IdentifyOn);
        ctx.handle(LedEvent::IdentifyOff);
        assert_eq!(ctx.state, LedState::NormalStopped);
    }

    #[test]
    fn test_identify_blink_period() {
        let (mut ctx, states) = full_ctx();
        ctx.handle(LedEvent::IdentifyOn);

        // 半周期 10 拍后全部翻转
        for _ in 0..LED_TICKS_IDENTIFY - 1 {
            ctx.handle(LedEvent::Tick);
            assert_eq!(states.lock().get("state"), Some(&true));
        }
        ctx.handle(LedEvent::Tick);
        assert_eq!(states.lock().get("state"), Some(&false));

        for _ in 0..LED_TICKS_IDENTIFY {
            ctx.handle(LedEvent::Tick);
        }
        assert_eq!(states.lock().get("state"), Some(&true));
    }

    #[test]
    fn test_activity_window_low_pass() {
        let window = ActivityWindow {
            deadline: Mutex::new([None; 2]),
            has_dual: true,
        };
        let span = Duration::from_millis(100);

        assert!(window.pass(ACTIVITY_RX, span));
        // 窗口未过，事件被丢弃
        assert!(!window.pass(ACTIVITY_RX, span));
        // 另一方向的窗口独立
        assert!(window.pass(ACTIVITY_TX, span));

        std::thread::sleep(span + Duration::from_millis(20));
        assert!(window.pass(ACTIVITY_RX, span));
    }
}
