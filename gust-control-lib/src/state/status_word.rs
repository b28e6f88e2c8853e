use std::fmt::{Display, Formatter};

use serde::Serialize;

const POWER_MASK: u32 = 0x10;
const LED_MASK: u32 = 0x20;
const SLEEP_MASK: u32 = 0x80;
const SPEED_MASK: u32 = 0x07;
const TIMER_HOURS_MASK: u32 = 0x000F_0000;
const TIMER_HOURS_SHIFT: u32 = 16;
const TIMER_ELAPSED_MASK: u32 = 0xFF00_0000;
const TIMER_ELAPSED_SHIFT: u32 = 24;
/// Each unit of the elapsed-timer byte counts four minutes.
const TIMER_ELAPSED_UNIT_MINUTES: u16 = 4;
const BRIGHTNESS_MASK: u32 = 0x7F00;
const BRIGHTNESS_SHIFT: u32 = 8;
const COOL_MASK: u32 = 0x08;
const WARM_MASK: u32 = 0x8000;

/// Colour temperature of the fan light, on models that have a tunable light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LightColor {
    Cool,
    Warm,
    Daylight,
}

impl Display for LightColor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let color_str = match self {
            LightColor::Cool => "cool",
            LightColor::Warm => "warm",
            LightColor::Daylight => "daylight",
        };
        write!(f, "{}", color_str)
    }
}

/// Semantic view of the packed 32-bit status word carried in state broadcasts.
///
/// Every field is derived from `value`. `brightness` and `color` are decoded for
/// all devices; fans without a tunable light simply leave those bits clear or
/// meaningless, so treat them as advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DecodedStatus {
    pub value: u32,
    pub power: bool,
    pub led: bool,
    pub sleep: bool,
    /// Raw 3-bit speed, 0..=7.
    pub speed: u8,
    /// 0..=15.
    pub timer_hours: u8,
    /// 0..=1020.
    pub timer_elapsed_minutes: u16,
    /// 0..=127.
    pub brightness: Option<u8>,
    pub color: Option<LightColor>,
}

impl DecodedStatus {
    pub fn decode(value: u32) -> Self {
        let cool = value & COOL_MASK != 0;
        let warm = value & WARM_MASK != 0;
        let color = match (cool, warm) {
            (true, true) => Some(LightColor::Daylight),
            (true, false) => Some(LightColor::Cool),
            (false, true) => Some(LightColor::Warm),
            (false, false) => None,
        };

        DecodedStatus {
            value,
            power: value & POWER_MASK != 0,
            led: value & LED_MASK != 0,
            sleep: value & SLEEP_MASK != 0,
            speed: (value & SPEED_MASK) as u8,
            timer_hours: ((value & TIMER_HOURS_MASK) >> TIMER_HOURS_SHIFT) as u8,
            timer_elapsed_minutes: ((value & TIMER_ELAPSED_MASK) >> TIMER_ELAPSED_SHIFT) as u16
                * TIMER_ELAPSED_UNIT_MINUTES,
            brightness: Some(((value & BRIGHTNESS_MASK) >> BRIGHTNESS_SHIFT) as u8),
            color,
        }
    }
}

impl Display for DecodedStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "state_value={} power={} speed={} led={} sleep={} timer_hours={} timer_elapsed_mins={}",
            self.value,
            self.power,
            self.speed,
            self.led,
            self.sleep,
            self.timer_hours,
            self.timer_elapsed_minutes
        )?;
        if let Some(color) = self.color {
            write!(f, " color={}", color)?;
        }
        if let Some(brightness) = self.brightness {
            write!(f, " brightness={}", brightness)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_bit_only() {
        let status = DecodedStatus::decode(0x10);
        assert!(status.power);
        assert!(!status.led);
        assert!(!status.sleep);
        assert_eq!(status.speed, 0);
        assert_eq!(status.timer_hours, 0);
        assert_eq!(status.timer_elapsed_minutes, 0);
        assert_eq!(status.brightness, Some(0));
        assert_eq!(status.color, None);
    }

    #[test]
    fn test_zero_is_all_off() {
        let status = DecodedStatus::decode(0);
        assert_eq!(status.value, 0);
        assert!(!status.power && !status.led && !status.sleep);
        assert_eq!(status.color, None);
    }

    #[test]
    fn test_power_and_speed() {
        let status = DecodedStatus::decode(0x16);
        assert!(status.power);
        assert_eq!(status.speed, 6);
    }

    #[test]
    fn test_led_and_sleep() {
        let status = DecodedStatus::decode(0x20 | 0x80);
        assert!(status.led);
        assert!(status.sleep);
        assert!(!status.power);
    }

    #[test]
    fn test_speed_uses_three_bits() {
        assert_eq!(DecodedStatus::decode(0x07).speed, 7);
        assert_eq!(DecodedStatus::decode(0x0F).speed, 7);
    }

    #[test]
    fn test_timer_fields() {
        let status = DecodedStatus::decode(0x0003_0000);
        assert_eq!(status.timer_hours, 3);
        let status = DecodedStatus::decode(0xFF0F_0000);
        assert_eq!(status.timer_hours, 15);
        assert_eq!(status.timer_elapsed_minutes, 1020);
        let status = DecodedStatus::decode(0x0A00_0000);
        assert_eq!(status.timer_elapsed_minutes, 40);
    }

    #[test]
    fn test_brightness() {
        assert_eq!(DecodedStatus::decode(0x7F00).brightness, Some(127));
        assert_eq!(DecodedStatus::decode(0x3200).brightness, Some(50));
    }

    #[test]
    fn test_color_combinations() {
        assert_eq!(DecodedStatus::decode(0x08).color, Some(LightColor::Cool));
        assert_eq!(DecodedStatus::decode(0x8000).color, Some(LightColor::Warm));
        assert_eq!(DecodedStatus::decode(0x8008).color, Some(LightColor::Daylight));
    }

    #[test]
    fn test_cool_bit_does_not_leak_into_speed() {
        let status = DecodedStatus::decode(0x0B);
        assert_eq!(status.speed, 3);
        assert_eq!(status.color, Some(LightColor::Cool));
    }

    #[test]
    fn test_all_bits_set_is_total() {
        let status = DecodedStatus::decode(u32::MAX);
        assert!(status.power && status.led && status.sleep);
        assert_eq!(status.speed, 7);
        assert_eq!(status.timer_hours, 15);
        assert_eq!(status.timer_elapsed_minutes, 1020);
        assert_eq!(status.brightness, Some(127));
        assert_eq!(status.color, Some(LightColor::Daylight));
    }

    #[test]
    fn test_display_includes_optional_fields() {
        let text = DecodedStatus::decode(0x8016).to_string();
        assert!(text.starts_with("state_value=32790 power=true speed=6"));
        assert!(text.contains("color=warm"));
        assert!(text.contains("brightness=0"));
    }
}
