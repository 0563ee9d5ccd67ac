#[cfg(test)]
mod opus_codec_tests {
    use crate::opus_codec::*;
    use crate::tests::{le_bytes, mono_samples};

    // 20 ms at 16 kHz
    const FRAME: usize = 320;

    #[test]
    fn test_opus_config_default() {
        let config = OpusConfig::default();

        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.bitrate, 24000);
        assert_eq!(config.complexity, 5);
        assert_eq!(config.application, OpusApplication::VoIP);
    }

    #[test]
    fn test_opus_config_validation() {
        let mut config = OpusConfig::default();

        // Test valid configurations
        for rate in [8000, 12000, 16000, 24000, 48000] {
            config.sample_rate = rate;
            assert!(config.validate().is_ok(), "rate {}", rate);
        }

        // Test invalid configurations
        config.sample_rate = 44100;
        assert!(config.validate().is_err());

        config.sample_rate = 16000;
        config.bitrate = 1000;
        assert!(config.validate().is_err());

        config.bitrate = 24000;
        config.complexity = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_frame_size_per_rate() {
        assert_eq!(frame_size_for_rate(16000), FRAME);
        assert_eq!(frame_size_for_rate(8000), 160);
        assert_eq!(frame_size_for_rate(48000), 960);
    }

    #[test]
    fn test_encoder_creation() {
        let encoder = OpusFrameEncoder::new(OpusConfig::default()).unwrap();

        assert_eq!(encoder.frame_size(), FRAME);
        assert_eq!(encoder.codec_descriptor(), "audio/opus;rate=16000");
        assert_eq!(encoder.frames_encoded(), 0);
    }

    #[test]
    fn test_encode_one_frame() {
        let mut encoder = OpusFrameEncoder::new(OpusConfig::default()).unwrap();
        let pcm = le_bytes(&mono_samples(-160, FRAME));

        let packet = encoder.encode(&pcm).unwrap();
        assert!(!packet.is_empty());
        assert!(packet.len() < pcm.len());
        assert_eq!(encoder.frames_encoded(), 1);
        assert_eq!(encoder.total_bytes_encoded(), packet.len() as u64);
    }

    #[test]
    fn test_encode_rejects_partial_frame() {
        let mut encoder = OpusFrameEncoder::new(OpusConfig::default()).unwrap();
        let pcm = le_bytes(&mono_samples(0, FRAME - 1));

        assert!(encoder.encode(&pcm).is_err());
        assert_eq!(encoder.frames_encoded(), 0);
    }

    #[test]
    fn test_every_application_builds_an_encoder() {
        for application in [OpusApplication::VoIP, OpusApplication::Audio, OpusApplication::LowDelay] {
            let config = OpusConfig {
                application,
                ..OpusConfig::default()
            };
            let mut encoder = OpusFrameEncoder::new(config).unwrap();
            assert_eq!(encoder.config().application, application);

            let pcm = le_bytes(&mono_samples(0, FRAME));
            assert!(encoder.encode(&pcm).is_ok(), "{:?}", application);
        }
    }

    #[test]
    fn test_encoder_follows_capture_rate() {
        let config = OpusConfig {
            sample_rate: 48000,
            ..OpusConfig::default()
        };
        let mut encoder = OpusFrameEncoder::new(config).unwrap();
        assert_eq!(encoder.codec_descriptor(), "audio/opus;rate=48000");

        let pcm = vec![0u8; encoder.frame_size() * 2];
        assert!(encoder.encode(&pcm).is_ok());
    }
}
