// Client configuration.
// Logging defaults to on in debug builds and off in release builds.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

pub const HD_VIDEO_WIDTH: u32 = 1280;
pub const HD_VIDEO_HEIGHT: u32 = 720;
pub const DEFAULT_VIDEO_FPS: u32 = 30;
/// Largest accepted capture width or height (8K).
pub const MAX_VIDEO_DIMENSION: u32 = 7680;
pub const MAX_VIDEO_FPS: u32 = 120;

/// Queue depth above which the executor starts warning.
pub const DEFAULT_QUEUE_HIGH_WATER_MARK: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub ice_servers: Vec<IceServerConfig>,
    pub ice_transport_policy: IceTransportPolicy,
    pub media: MediaConfig,
    pub failure_policy: FailurePolicy,
    pub queue_high_water_mark: usize,
    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                IceServerConfig {
                    id: "default-stun".into(),
                    r#type: IceServerType::Stun,
                    url: "stun:stun.l.google.com:19302".into(),
                    username: None,
                    credential: None,
                },
                IceServerConfig {
                    id: "default-stun-1".into(),
                    r#type: IceServerType::Stun,
                    url: "stun:stun1.l.google.com:19302".into(),
                    username: None,
                    credential: None,
                },
            ],
            ice_transport_policy: IceTransportPolicy::All,
            media: MediaConfig::default(),
            failure_policy: FailurePolicy::Shared,
            queue_high_water_mark: DEFAULT_QUEUE_HIGH_WATER_MARK,
            logging: LoggingConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Rejects ICE servers without a URL, TURN servers without credentials
    /// and capture formats beyond 8K or 120 fps.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let media = &self.media;
        if media.video_width > MAX_VIDEO_DIMENSION || media.video_height > MAX_VIDEO_DIMENSION {
            return Err(ConfigError::Invalid(format!(
                "capture size {}x{} exceeds {MAX_VIDEO_DIMENSION}",
                media.video_width, media.video_height
            )));
        }
        if media.video_fps > MAX_VIDEO_FPS {
            return Err(ConfigError::Invalid(format!(
                "capture rate {} fps exceeds {MAX_VIDEO_FPS}",
                media.video_fps
            )));
        }
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "ice server '{}' has an empty url",
                    server.id
                )));
            }
            if server.r#type == IceServerType::Turn
                && (server.username.is_none() || server.credential.is_none())
            {
                return Err(ConfigError::Invalid(format!(
                    "turn server '{}' requires username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }
}

/// ICE server entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceServerConfig {
    #[serde(default)]
    pub id: String,
    pub r#type: IceServerType,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IceServerType {
    Stun,
    Turn,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IceTransportPolicy {
    #[default]
    All,
    Relay,
}

/// How negotiation and connectivity failures are scoped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// First failure on any session latches the whole client.
    #[default]
    Shared,
    /// Each session latches its own failure; the others keep working.
    PerSession,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum VideoCodec {
    #[default]
    #[serde(rename = "VP8")]
    Vp8,
    #[serde(rename = "VP9")]
    Vp9,
    #[serde(rename = "H264 Baseline")]
    H264Baseline,
    #[serde(rename = "H264 High")]
    H264High,
}

impl VideoCodec {
    /// Codec name as it appears in SDP.
    pub fn sdp_name(self) -> &'static str {
        match self {
            VideoCodec::Vp8 => "VP8",
            VideoCodec::Vp9 => "VP9",
            VideoCodec::H264Baseline | VideoCodec::H264High => "H264",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            VideoCodec::Vp8 => webrtc::api::media_engine::MIME_TYPE_VP8,
            VideoCodec::Vp9 => webrtc::api::media_engine::MIME_TYPE_VP9,
            VideoCodec::H264Baseline | VideoCodec::H264High => {
                webrtc::api::media_engine::MIME_TYPE_H264
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    #[default]
    Opus,
}

impl AudioCodec {
    /// Codec name as it appears in `a=rtpmap`.
    pub fn sdp_name(self) -> &'static str {
        match self {
            AudioCodec::Opus => "opus",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            AudioCodec::Opus => webrtc::api::media_engine::MIME_TYPE_OPUS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MediaConfig {
    /// 0 means "use the HD default"
    pub video_width: u32,
    pub video_height: u32,
    /// 0 means "use the default frame rate"
    pub video_fps: u32,
    pub video_codec: VideoCodec,
    pub video_codec_hw_acceleration: bool,
    pub video_flexfec: bool,
    pub audio_codec: AudioCodec,
    /// kbps, written into the local description's audio fmtp line. 0 leaves
    /// the engine default.
    pub audio_start_bitrate: u32,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            video_width: 0,
            video_height: 0,
            video_fps: 0,
            video_codec: VideoCodec::Vp8,
            video_codec_hw_acceleration: false,
            video_flexfec: false,
            audio_codec: AudioCodec::Opus,
            audio_start_bitrate: 0,
        }
    }
}

impl MediaConfig {
    /// Capture format with defaults filled in.
    pub fn capture_format(&self) -> CaptureFormat {
        let (width, height) = if self.video_width == 0 || self.video_height == 0 {
            (HD_VIDEO_WIDTH, HD_VIDEO_HEIGHT)
        } else {
            (self.video_width, self.video_height)
        };
        let fps = if self.video_fps == 0 {
            DEFAULT_VIDEO_FPS
        } else {
            self.video_fps
        };
        CaptureFormat { width, height, fps }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl CaptureFormat {
    pub fn is_hd(&self) -> bool {
        u64::from(self.width) * u64::from(self.height)
            >= u64::from(HD_VIDEO_WIDTH) * u64::from(HD_VIDEO_HEIGHT)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// `EnvFilter` directive, e.g. "janus_room=debug"
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: LOGGING_ENABLED,
            filter: "janus_room=debug,webrtc=warn".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capture_dimensions_fall_back_to_hd() {
        let media = MediaConfig {
            video_width: 0,
            video_height: 288,
            video_fps: 0,
            ..Default::default()
        };
        let format = media.capture_format();
        assert_eq!(format.width, HD_VIDEO_WIDTH);
        assert_eq!(format.height, HD_VIDEO_HEIGHT);
        assert_eq!(format.fps, DEFAULT_VIDEO_FPS);
        assert!(format.is_hd());
    }

    #[test]
    fn explicit_capture_format_is_kept() {
        let media = MediaConfig {
            video_width: 352,
            video_height: 288,
            video_fps: 15,
            ..Default::default()
        };
        let format = media.capture_format();
        assert_eq!((format.width, format.height, format.fps), (352, 288, 15));
        assert!(!format.is_hd());
    }

    #[test]
    fn h264_profiles_share_sdp_name() {
        assert_eq!(VideoCodec::H264High.sdp_name(), "H264");
        assert_eq!(VideoCodec::H264Baseline.sdp_name(), "H264");
        assert_eq!(VideoCodec::Vp9.sdp_name(), "VP9");
    }

    #[test]
    fn parses_partial_json_with_defaults() {
        let config = ClientConfig::from_json_str(
            r#"{
                "ice_servers": [
                    {"type": "turn", "url": "192.168.100.169:3478",
                     "username": "dds", "credential": "123456"}
                ],
                "media": {"video_width": 352, "video_height": 288, "video_codec": "H264 High"},
                "failure_policy": "per_session"
            }"#,
        )
        .unwrap();
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.media.video_codec, VideoCodec::H264High);
        assert_eq!(config.media.video_fps, 0);
        assert_eq!(config.failure_policy, FailurePolicy::PerSession);
        assert_eq!(config.queue_high_water_mark, DEFAULT_QUEUE_HIGH_WATER_MARK);
    }

    #[test]
    fn turn_without_credentials_is_rejected() {
        let err = ClientConfig::from_json_str(
            r#"{"ice_servers": [{"type": "turn", "url": "turn:example.org"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn huge_capture_sizes_do_not_overflow() {
        let format = CaptureFormat {
            width: 70_000,
            height: 70_000,
            fps: 30,
        };
        assert!(format.is_hd());
        let max = CaptureFormat {
            width: u32::MAX,
            height: u32::MAX,
            fps: 30,
        };
        assert!(max.is_hd());
    }

    #[test]
    fn oversized_capture_format_is_rejected() {
        let err = ClientConfig::from_json_str(
            r#"{"media": {"video_width": 70000, "video_height": 70000}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ClientConfig::from_json_str(r#"{"media": {"video_fps": 1000}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let uhd = r#"{"media": {"video_width": 3840, "video_height": 2160, "video_fps": 60}}"#;
        assert!(ClientConfig::from_json_str(uhd).is_ok());
    }
}
