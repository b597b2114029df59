//! Physical input and screen capture behind one mockable trait.

use std::sync::Mutex;

use async_trait::async_trait;
use enigo::{Axis, Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};
use xcap::Monitor;

use crate::errors::{PilotError, PilotResult};
use crate::grounding::types::Screenshot;
use crate::operations::ScrollDirection;

const SCROLL_LINES: i32 = 5;

/// Coordinates are normalized to the unit square; implementations own the
/// mapping to screen pixels.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn click(&self, x: f64, y: f64) -> PilotResult<()>;
    async fn write(&self, text: &str) -> PilotResult<()>;
    async fn press(&self, keys: &[String]) -> PilotResult<()>;
    async fn scroll(&self, direction: ScrollDirection) -> PilotResult<()>;
    async fn capture_screenshot(&self) -> PilotResult<Screenshot>;
}

pub struct EnigoActuator {
    enigo: Mutex<Enigo>,
}

impl EnigoActuator {
    pub fn new() -> PilotResult<Self> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| PilotError::execution("input", format!("enigo init: {e:?}")))?;
        Ok(Self { enigo: Mutex::new(enigo) })
    }

    fn screen_size() -> PilotResult<(u32, u32)> {
        let monitors = Monitor::all()
            .map_err(|e| PilotError::execution("screenshot", format!("{e:?}")))?;
        let monitor = monitors
            .first()
            .ok_or_else(|| PilotError::execution("screenshot", "no monitor found"))?;
        Ok((monitor.width(), monitor.height()))
    }
}

fn map_key(key: &str) -> PilotResult<Key> {
    match key.to_lowercase().as_str() {
        "enter" | "return" => Ok(Key::Return),
        "tab" => Ok(Key::Tab),
        "escape" | "esc" => Ok(Key::Escape),
        "backspace" => Ok(Key::Backspace),
        "control" | "ctrl" => Ok(Key::Control),
        "shift" => Ok(Key::Shift),
        "alt" | "option" => Ok(Key::Alt),
        "meta" | "command" | "super" | "win" => Ok(Key::Meta),
        "delete" | "del" => Ok(Key::Delete),
        "space" => Ok(Key::Space),
        "up" => Ok(Key::UpArrow),
        "down" => Ok(Key::DownArrow),
        "left" => Ok(Key::LeftArrow),
        "right" => Ok(Key::RightArrow),
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Key::Unicode(c)),
                _ => Err(PilotError::execution("press", format!("unsupported key '{key}'"))),
            }
        }
    }
}

#[async_trait]
impl Actuator for EnigoActuator {
    async fn click(&self, x: f64, y: f64) -> PilotResult<()> {
        let (w, h) = Self::screen_size()?;
        let px = (x * w as f64).round() as i32;
        let py = (y * h as f64).round() as i32;
        let mut enigo = self
            .enigo
            .lock()
            .map_err(|_| PilotError::execution("click", "input device lock poisoned"))?;
        enigo
            .move_mouse(px, py, Coordinate::Abs)
            .map_err(|e| PilotError::execution("click", format!("{e:?}")))?;
        enigo
            .button(Button::Left, Direction::Click)
            .map_err(|e| PilotError::execution("click", format!("{e:?}")))?;
        tracing::debug!(x = px, y = py, "clicked");
        Ok(())
    }

    async fn write(&self, text: &str) -> PilotResult<()> {
        let mut enigo = self
            .enigo
            .lock()
            .map_err(|_| PilotError::execution("write", "input device lock poisoned"))?;
        enigo
            .text(text)
            .map_err(|e| PilotError::execution("write", format!("{e:?}")))?;
        Ok(())
    }

    /// Hotkey semantics: modifiers go down in order, the chord releases in
    /// reverse.
    async fn press(&self, keys: &[String]) -> PilotResult<()> {
        let mapped: Vec<Key> = keys.iter().map(|k| map_key(k)).collect::<PilotResult<_>>()?;
        let mut enigo = self
            .enigo
            .lock()
            .map_err(|_| PilotError::execution("press", "input device lock poisoned"))?;
        for key in &mapped {
            enigo
                .key(*key, Direction::Press)
                .map_err(|e| PilotError::execution("press", format!("{e:?}")))?;
        }
        for key in mapped.iter().rev() {
            enigo
                .key(*key, Direction::Release)
                .map_err(|e| PilotError::execution("press", format!("{e:?}")))?;
        }
        Ok(())
    }

    async fn scroll(&self, direction: ScrollDirection) -> PilotResult<()> {
        let lines = match direction {
            ScrollDirection::Up => -SCROLL_LINES,
            ScrollDirection::Down => SCROLL_LINES,
        };
        let mut enigo = self
            .enigo
            .lock()
            .map_err(|_| PilotError::execution("scroll", "input device lock poisoned"))?;
        enigo
            .scroll(lines, Axis::Vertical)
            .map_err(|e| PilotError::execution("scroll", format!("{e:?}")))?;
        Ok(())
    }

    async fn capture_screenshot(&self) -> PilotResult<Screenshot> {
        // Blocking OS call, kept off the async workers.
        tokio::task::spawn_blocking(|| {
            let monitors = Monitor::all()
                .map_err(|e| PilotError::execution("screenshot", format!("{e:?}")))?;
            let monitor = monitors
                .first()
                .ok_or_else(|| PilotError::execution("screenshot", "no monitor found"))?;
            let rgba = monitor
                .capture_image()
                .map_err(|e| PilotError::execution("screenshot", format!("{e:?}")))?;

            let (width, height) = (rgba.width(), rgba.height());
            let mut png = Vec::new();
            image::DynamicImage::ImageRgba8(rgba)
                .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
                .map_err(|e| PilotError::execution("screenshot", format!("{e}")))?;
            tracing::debug!(width, height, bytes = png.len(), "screenshot captured");
            Ok(Screenshot { png, width, height })
        })
        .await
        .map_err(|e| PilotError::execution("screenshot", format!("capture task: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_keys_map_case_insensitively() {
        assert_eq!(map_key("ENTER").unwrap(), Key::Return);
        assert_eq!(map_key("Ctrl").unwrap(), Key::Control);
    }

    #[test]
    fn single_characters_map_to_unicode() {
        assert_eq!(map_key("a").unwrap(), Key::Unicode('a'));
    }

    #[test]
    fn unknown_key_is_an_execution_error() {
        let err = map_key("hyperdrive").unwrap_err();
        assert!(matches!(err, PilotError::Execution { .. }));
    }
}
