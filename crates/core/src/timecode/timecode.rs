use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// `HH:MM:SS:FF` position used to display show time and cue elapsed time.
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub struct TimeCode {
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
    pub frames: u32,
    pub frame_rate: u32,
}

impl Default for TimeCode {
    fn default() -> Self {
        Self {
            hours: 0,
            minutes: 0,
            seconds: 0,
            frames: 0,
            frame_rate: 30, // Default to 30fps
        }
    }
}

impl TimeCode {
    /// Round down `duration` to the last whole frame at `frame_rate`.
    pub fn from_duration(duration: Duration, frame_rate: u32) -> Self {
        let frame_rate = frame_rate.max(1);
        let total_seconds = duration.as_secs();
        let frames = (duration.subsec_nanos() as u64 * frame_rate as u64 / 1_000_000_000) as u32;

        Self {
            hours: (total_seconds / 3600) as u32,
            minutes: ((total_seconds / 60) % 60) as u32,
            seconds: (total_seconds % 60) as u32,
            frames,
            frame_rate,
        }
    }

    pub fn set_frame_rate(&mut self, frame_rate: u32) {
        self.frame_rate = frame_rate.max(1);
    }

    pub fn to_seconds(&self) -> f64 {
        self.hours as f64 * 3600.0
            + self.minutes as f64 * 60.0
            + self.seconds as f64
            + self.frames as f64 / self.frame_rate as f64
    }

    pub fn to_duration(&self) -> Duration {
        Duration::from_secs_f64(self.to_seconds())
    }
}

impl fmt::Display for TimeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}:{:02}",
            self.hours, self.minutes, self.seconds, self.frames
        )
    }
}

/// Parses `HH:MM:SS:FF` at the default frame rate.
impl FromStr for TimeCode {
    type Err = String;

    fn from_str(timecode: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = timecode.trim().split(':').collect();
        if parts.len() != 4 {
            return Err("Invalid timecode format. Expected HH:MM:SS:FF".to_string());
        }

        let timecode = Self {
            hours: parts[0].parse().map_err(|_| "Invalid hours")?,
            minutes: parts[1].parse().map_err(|_| "Invalid minutes")?,
            seconds: parts[2].parse().map_err(|_| "Invalid seconds")?,
            frames: parts[3].parse().map_err(|_| "Invalid frames")?,
            ..Self::default()
        };
        if timecode.minutes >= 60 || timecode.seconds >= 60 {
            return Err("Minutes and seconds must be below 60".to_string());
        }
        if timecode.frames >= timecode.frame_rate {
            return Err(format!("Frames must be below {}", timecode.frame_rate));
        }
        Ok(timecode)
    }
}
