//! Short/long press discrimination for a single physical key.
//!
//! Raw down/repeat/up sequences are collapsed into exactly one synthesized
//! press/release pair once the key is released. The emitted code depends on how
//! many auto-repeats arrived while the key was held.

use crate::event::{InputEvent, KeyValue};
use tracing::debug;

/// Repeats needed before a press counts as long.
pub const REPEAT_LIMIT: u32 = 2;

#[derive(Debug, Clone)]
pub struct LongPressTranslator {
    short_press_key: u16,
    long_press_key: u16,
    down: bool,
    long_press: bool,
    repeat_count: u32,
}

impl LongPressTranslator {
    pub fn new(short_press_key: u16, long_press_key: u16) -> Self {
        Self {
            short_press_key,
            long_press_key,
            down: false,
            long_press: false,
            repeat_count: 0,
        }
    }

    pub fn is_down(&self) -> bool {
        self.down
    }

    pub fn repeat_count(&self) -> u32 {
        self.repeat_count
    }

    /// Whether the last completed press was classified as long.
    pub fn was_long_press(&self) -> bool {
        self.long_press
    }

    /// Feeds one raw event for the tracked key. Returns the synthesized
    /// press/release pair when the key goes up.
    pub fn feed(&mut self, event: &InputEvent) -> Option<[InputEvent; 2]> {
        match KeyValue::from_raw(event.value)? {
            KeyValue::Pressed => {
                self.down = true;
                self.repeat_count = 0;
                self.long_press = false;
                None
            }
            KeyValue::Repeat => {
                if self.down {
                    self.repeat_count += 1;
                }
                None
            }
            KeyValue::Released => {
                if !self.down {
                    return None;
                }
                self.down = false;
                self.long_press = self.repeat_count > REPEAT_LIMIT;
                let code = if self.long_press {
                    self.long_press_key
                } else {
                    self.short_press_key
                };
                debug!(
                    repeats = self.repeat_count,
                    long_press = self.long_press,
                    code,
                    "Key released"
                );
                self.repeat_count = 0;
                Some([
                    InputEvent::key(code, KeyValue::Pressed),
                    InputEvent::key(code, KeyValue::Released),
                ])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::{EV_KEY, KEY_PHONE, KEY_PLAYPAUSE};
    use crate::event::Timestamp;

    const SHORT: u16 = KEY_PLAYPAUSE;
    const LONG: u16 = KEY_PHONE;

    fn raw(value: i32) -> InputEvent {
        InputEvent::new(Timestamp::new(1, 0), EV_KEY, 226, value)
    }

    /// Runs one press/release cycle with `repeats` auto-repeats in between.
    fn cycle(translator: &mut LongPressTranslator, repeats: u32) -> [InputEvent; 2] {
        assert!(translator.feed(&raw(1)).is_none());
        for _ in 0..repeats {
            assert!(translator.feed(&raw(2)).is_none());
        }
        translator.feed(&raw(0)).expect("release emits a pair")
    }

    #[test]
    fn test_short_press_without_repeats() {
        let mut translator = LongPressTranslator::new(SHORT, LONG);
        let [down, up] = cycle(&mut translator, 0);
        assert_eq!((down.code, down.value), (SHORT, 1));
        assert_eq!((up.code, up.value), (SHORT, 0));
        assert_eq!(down.type_, EV_KEY);
        assert!(!translator.was_long_press());
    }

    #[test]
    fn test_repeat_limit_is_still_short() {
        let mut translator = LongPressTranslator::new(SHORT, LONG);
        let [down, _] = cycle(&mut translator, REPEAT_LIMIT);
        assert_eq!(down.code, SHORT);
    }

    #[test]
    fn test_long_press_after_three_repeats() {
        let mut translator = LongPressTranslator::new(SHORT, LONG);
        let [down, up] = cycle(&mut translator, 3);
        assert_eq!((down.code, down.value), (LONG, 1));
        assert_eq!((up.code, up.value), (LONG, 0));
        assert!(translator.was_long_press());
    }

    #[test]
    fn test_counts_reset_between_cycles() {
        let mut translator = LongPressTranslator::new(SHORT, LONG);
        assert_eq!(cycle(&mut translator, 5)[0].code, LONG);
        assert_eq!(translator.repeat_count(), 0);
        assert_eq!(cycle(&mut translator, 1)[0].code, SHORT);
        assert_eq!(cycle(&mut translator, 3)[0].code, LONG);
    }

    #[test]
    fn test_output_uses_current_clock() {
        let mut translator = LongPressTranslator::new(SHORT, LONG);
        let [down, up] = cycle(&mut translator, 0);
        assert_ne!(down.time, Timestamp::new(1, 0));
        assert!((up.time.sec, up.time.usec) >= (down.time.sec, down.time.usec));
    }

    #[test]
    fn test_nothing_emitted_outside_a_cycle() {
        let mut translator = LongPressTranslator::new(SHORT, LONG);
        assert!(translator.feed(&raw(0)).is_none());
        assert!(translator.feed(&raw(2)).is_none());
        assert_eq!(translator.repeat_count(), 0);
        assert!(translator.feed(&raw(7)).is_none());
        assert!(!translator.is_down());
    }

    #[test]
    fn test_second_press_restarts_count() {
        let mut translator = LongPressTranslator::new(SHORT, LONG);
        translator.feed(&raw(1));
        translator.feed(&raw(2));
        translator.feed(&raw(2));
        translator.feed(&raw(2));
        translator.feed(&raw(1));
        assert_eq!(translator.repeat_count(), 0);
        let [down, _] = translator.feed(&raw(0)).unwrap();
        assert_eq!(down.code, SHORT);
    }
}
