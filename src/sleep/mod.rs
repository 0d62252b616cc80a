mod fade;
mod host;
mod manager;
mod window;

pub use fade::{FADE_FLOOR, fade_volume};
pub use host::{SharedSleepTimerHost, SleepTimerHost};
pub use manager::{SleepTimerManager, SleepTimerMode, SleepTimerOptions};
pub use window::is_within_auto_window;
