use std::time::Duration;

use tracing::warn;

pub const MIN_FRAMES_IN_FLIGHT: usize = 2;
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Frames rendered by a headless run when no `-max-frames` is given.
pub const DEFAULT_HEADLESS_FRAMES: u64 = 120;

/// Startup options, read from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    pub use_warp_device: bool,
    pub headless: bool,
    pub frames_in_flight: usize,
    /// 1 waits for vertical sync, 0 presents immediately.
    pub sync_interval: u32,
    pub max_frames: Option<u64>,
    /// `None` waits on fences forever.
    pub fence_timeout: Option<Duration>,
    /// Capacity of the shader visible CBV/SRV/UAV heap.
    pub descriptor_capacity: u32,
    pub window_size: (u32, u32),
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            use_warp_device: false,
            headless: false,
            frames_in_flight: MIN_FRAMES_IN_FLIGHT,
            sync_interval: 1,
            max_frames: None,
            fence_timeout: None,
            descriptor_capacity: 1024,
            window_size: (1280, 720),
        }
    }
}

/// Builds a RendererConfig from the process arguments
pub fn build_config() -> RendererConfig {
    RendererConfig::from_args(std::env::args().skip(1))
}

impl RendererConfig {
    /// Flags are case-insensitive and may start with `-` or `/`. Unknown flags are
    /// ignored, malformed values keep the default.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let arg = arg.as_ref();
            let Some(flag) = arg.strip_prefix('-').or_else(|| arg.strip_prefix('/')) else {
                continue;
            };
            let flag = flag.to_ascii_lowercase();

            match flag.as_str() {
                "warp" => config.use_warp_device = true,
                "headless" => config.headless = true,
                "no-vsync" => config.sync_interval = 0,
                "frames" => {
                    if let Some(frames) = parse_value::<usize>(&flag, args.next()) {
                        let clamped = frames.clamp(MIN_FRAMES_IN_FLIGHT, MAX_FRAMES_IN_FLIGHT);
                        if clamped != frames {
                            warn!(requested = frames, using = clamped, "frames in flight clamped");
                        }
                        config.frames_in_flight = clamped;
                    }
                }
                "max-frames" => {
                    if let Some(frames) = parse_value(&flag, args.next()) {
                        config.max_frames = Some(frames);
                    }
                }
                "fence-timeout-ms" => {
                    if let Some(millis) = parse_value(&flag, args.next()) {
                        config.fence_timeout = Some(Duration::from_millis(millis));
                    }
                }
                "descriptors" => {
                    if let Some(capacity) = parse_value::<u32>(&flag, args.next()) {
                        if capacity == 0 {
                            warn!("ignoring a descriptor capacity of zero");
                        } else {
                            config.descriptor_capacity = capacity;
                        }
                    }
                }
                _ => {}
            }
        }

        config
    }

    /// Frame limit for the run, with a finite default when headless.
    pub fn frame_limit(&self) -> Option<u64> {
        match (self.max_frames, self.headless) {
            (Some(frames), _) => Some(frames),
            (None, true) => Some(DEFAULT_HEADLESS_FRAMES),
            (None, false) => None,
        }
    }
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<impl AsRef<str>>) -> Option<T> {
    let value = match value {
        Some(value) => value,
        None => {
            warn!(flag, "missing value");
            return None;
        }
    };
    let value = value.as_ref();
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(flag, value, "ignoring malformed value");
            None
        }
    }
}
